//! Anthropic messages driver — SSE streaming with extended thinking and
//! tool_use blocks.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::sse::{parse_sse_line, LineBuffer, SseParsed};
use crate::types::{ChatMessage, ChatRequest, MessageRole, StreamEvent};

const READ_TIMEOUT_SECS: u64 = 120;
const API_VERSION: &str = "2023-06-01";
/// Budget used when the caller asks for model-chosen thinking (`-1`).
const DYNAMIC_THINKING_BUDGET: u32 = 8192;

pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(READ_TIMEOUT_SECS))
                .build()
                .expect("reqwest client"),
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let body = build_request_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        debug!(model = %req.model, "streaming anthropic request");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let retry_after_ms = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let text = resp.text().await.unwrap_or_default();
            warn!(status, "anthropic API error");
            return Err(ProviderError::from_status(status, &text, retry_after_ms));
        }

        consume_stream(resp, tx).await
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = req.messages.iter().map(message_to_json).collect();

    let mut body = serde_json::json!({
        "model": req.model,
        "system": req.system,
        "messages": messages,
        "max_tokens": req.params.max_tokens.unwrap_or(4096),
        "stream": true,
    });

    // Thinking and temperature are mutually constrained: the API requires
    // temperature 1 when extended thinking is on.
    match req.params.thinking_budget {
        Some(budget) if budget != 0 => {
            let tokens = if budget < 0 {
                DYNAMIC_THINKING_BUDGET
            } else {
                budget as u32
            };
            body["thinking"] = serde_json::json!({
                "type": "enabled",
                "budget_tokens": tokens,
            });
            body["temperature"] = serde_json::json!(1.0);
        }
        _ => {
            body["temperature"] = serde_json::json!(req.params.temperature);
            body["top_p"] = serde_json::json!(req.params.top_p);
            if let Some(top_k) = req.params.top_k {
                body["top_k"] = serde_json::json!(top_k);
            }
        }
    }

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

fn message_to_json(m: &ChatMessage) -> serde_json::Value {
    match m.role {
        // Tool results ride in a user message containing a tool_result block.
        MessageRole::Tool => serde_json::json!({
            "role": "user",
            "content": [{
                "type": "tool_result",
                "tool_use_id": m.tool_call_id.as_deref().unwrap_or(""),
                "content": m.content,
            }]
        }),
        MessageRole::Assistant if !m.tool_calls.is_empty() => {
            let mut blocks: Vec<serde_json::Value> = Vec::new();
            if !m.content.is_empty() {
                blocks.push(serde_json::json!({ "type": "text", "text": m.content }));
            }
            for call in &m.tool_calls {
                blocks.push(serde_json::json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.arguments,
                }));
            }
            serde_json::json!({ "role": "assistant", "content": blocks })
        }
        MessageRole::User if !m.images.is_empty() => {
            let mut blocks = vec![serde_json::json!({ "type": "text", "text": m.content })];
            for img in &m.images {
                blocks.push(serde_json::json!({
                    "type": "image",
                    "source": {
                        "type": "base64",
                        "media_type": img.media_type,
                        "data": img.base64,
                    }
                }));
            }
            serde_json::json!({ "role": "user", "content": blocks })
        }
        MessageRole::Assistant => {
            serde_json::json!({ "role": "assistant", "content": m.content })
        }
        // Anthropic has no system role in messages; the caller put the system
        // prompt in the top-level field already.
        MessageRole::System | MessageRole::User => {
            serde_json::json!({ "role": "user", "content": m.content })
        }
    }
}

async fn consume_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) -> Result<()> {
    let mut byte_stream = resp.bytes_stream();
    let mut lines = LineBuffer::default();

    // Block index → (kind, tool call id) for currently open content blocks.
    let mut open_blocks: Vec<(u64, BlockKind)> = Vec::new();
    let mut input_tokens: u32 = 0;
    let mut saw_content = false;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk?;
        let text = String::from_utf8_lossy(&chunk);
        for line in lines.push(&text) {
            let Some(SseParsed::Data(data)) = parse_sse_line(&line) else {
                continue;
            };
            let parsed: serde_json::Value = match serde_json::from_str(&data) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "skipping malformed anthropic chunk");
                    continue;
                }
            };

            match parsed["type"].as_str().unwrap_or("") {
                "message_start" => {
                    input_tokens = parsed["message"]["usage"]["input_tokens"]
                        .as_u64()
                        .unwrap_or(0) as u32;
                }
                "content_block_start" => {
                    let index = parsed["index"].as_u64().unwrap_or(0);
                    let block = &parsed["content_block"];
                    match block["type"].as_str().unwrap_or("") {
                        "tool_use" => {
                            let id = block["id"].as_str().unwrap_or("").to_string();
                            let name = block["name"].as_str().unwrap_or("").to_string();
                            open_blocks.push((index, BlockKind::ToolUse(id.clone())));
                            saw_content = true;
                            if send(&tx, StreamEvent::ToolCallStart { id, name }).await.is_err() {
                                return Ok(());
                            }
                        }
                        "thinking" => open_blocks.push((index, BlockKind::Thinking)),
                        _ => open_blocks.push((index, BlockKind::Text)),
                    }
                }
                "content_block_delta" => {
                    let index = parsed["index"].as_u64().unwrap_or(0);
                    let delta = &parsed["delta"];
                    match delta["type"].as_str().unwrap_or("") {
                        "text_delta" => {
                            if let Some(t) = delta["text"].as_str() {
                                saw_content = true;
                                if send(&tx, StreamEvent::Text { delta: t.to_string() })
                                    .await
                                    .is_err()
                                {
                                    return Ok(());
                                }
                            }
                        }
                        "thinking_delta" => {
                            if let Some(t) = delta["thinking"].as_str() {
                                if send(&tx, StreamEvent::Thinking { delta: t.to_string() })
                                    .await
                                    .is_err()
                                {
                                    return Ok(());
                                }
                            }
                        }
                        "input_json_delta" => {
                            if let Some(frag) = delta["partial_json"].as_str() {
                                let id = open_blocks.iter().find_map(|(i, kind)| match kind {
                                    BlockKind::ToolUse(id) if *i == index => Some(id.clone()),
                                    _ => None,
                                });
                                if let Some(id) = id {
                                    if send(
                                        &tx,
                                        StreamEvent::ToolCallArgsDelta {
                                            id,
                                            json_fragment: frag.to_string(),
                                        },
                                    )
                                    .await
                                    .is_err()
                                    {
                                        return Ok(());
                                    }
                                }
                            }
                        }
                        _ => {}
                    }
                }
                "content_block_stop" => {
                    let index = parsed["index"].as_u64().unwrap_or(0);
                    if let Some(pos) = open_blocks.iter().position(|(i, _)| *i == index) {
                        let (_, kind) = open_blocks.remove(pos);
                        if let BlockKind::ToolUse(id) = kind {
                            if send(&tx, StreamEvent::ToolCallEnd { id }).await.is_err() {
                                return Ok(());
                            }
                        }
                    }
                }
                "message_delta" => {
                    let output = parsed["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32;
                    if send(
                        &tx,
                        StreamEvent::UsageUpdate {
                            input_tokens,
                            output_tokens: output,
                        },
                    )
                    .await
                    .is_err()
                    {
                        return Ok(());
                    }
                }
                "error" => {
                    let msg = parsed["error"]["message"].as_str().unwrap_or("stream error");
                    return Err(ProviderError::Unavailable(msg.to_string()));
                }
                _ => {}
            }
        }
    }

    if !saw_content {
        return Err(ProviderError::EmptyResponse);
    }

    let _ = tx.send(StreamEvent::Done).await;
    Ok(())
}

enum BlockKind {
    Text,
    Thinking,
    ToolUse(String),
}

async fn send(
    tx: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
) -> std::result::Result<(), ()> {
    tx.send(event).await.map_err(|_| ())
}
