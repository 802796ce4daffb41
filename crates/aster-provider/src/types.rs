use serde::{Deserialize, Serialize};

/// Role of a message handed to a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call the model emitted, as accumulated from the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallStub {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// An inline image attached to a user message (base64 payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePart {
    /// e.g. "image/jpeg"
    pub media_type: String,
    pub base64: String,
}

/// One message in the provider request. Tool linkage mirrors the session
/// transcript: a `Tool` message carries the id of the call it answers, an
/// `Assistant` message may carry the calls it issued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallStub>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImagePart>,
}

impl ChatMessage {
    pub fn text(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Vec::new(),
            images: Vec::new(),
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: Vec::new(),
            images: Vec::new(),
        }
    }
}

/// Tool definition sent to the LLM API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema: `{type: "object", properties: {...}, required: [...]}`.
    pub parameters: serde_json::Value,
}

/// Sampling parameters.
///
/// `thinking_budget`: `None` or `Some(0)` disables extended reasoning,
/// `Some(-1)` lets the model choose, a positive value is an explicit token
/// budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatParams {
    pub temperature: f64,
    pub max_tokens: Option<u32>,
    pub top_p: f64,
    pub top_k: Option<u32>,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub thinking_budget: Option<i64>,
}

impl Default for ChatParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: Some(4096),
            top_p: 0.95,
            top_k: None,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            thinking_budget: None,
        }
    }
}

impl ChatParams {
    pub fn thinking_enabled(&self) -> bool {
        matches!(self.thinking_budget, Some(b) if b != 0)
    }
}

/// A full chat request. `system` is kept separate from `messages` so each
/// driver can place it in its vendor's slot.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    pub params: ChatParams,
}

/// Events emitted while streaming a chat turn.
///
/// Providers must emit text and tool-call events in the order the model
/// produced them; a single turn may interleave several tool calls between
/// text segments.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Text { delta: String },
    ToolCallStart { id: String, name: String },
    ToolCallArgsDelta { id: String, json_fragment: String },
    ToolCallEnd { id: String },
    Thinking { delta: String },
    UsageUpdate { input_tokens: u32, output_tokens: u32 },
    Done,
}

/// Result of an embedding request. `dim` is the provider's vector width.
#[derive(Debug, Clone)]
pub struct EmbedResponse {
    pub vectors: Vec<Vec<f32>>,
    pub dim: usize,
}
