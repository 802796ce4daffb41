//! OpenAI-compatible driver — chat completions SSE plus embeddings.
//!
//! Works against any endpoint speaking the chat-completions dialect
//! (OpenAI, Groq, DeepSeek, local llama.cpp, …). Tool calls arrive as
//! indexed deltas; this driver re-emits them as ordered
//! ToolCallStart / ToolCallArgsDelta / ToolCallEnd events.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::provider::Provider;
use crate::sse::LineBuffer;
use crate::types::{ChatMessage, ChatRequest, EmbedResponse, MessageRole, StreamEvent};

const READ_TIMEOUT_SECS: u64 = 120;

pub struct OpenAiProvider {
    client: reqwest::Client,
    provider_name: String,
    api_key: String,
    base_url: String,
    chat_path: String,
    embedding_model: Option<String>,
    embedding_dim: Option<usize>,
}

impl OpenAiProvider {
    pub fn new(name: impl Into<String>, api_key: String, base_url: String) -> Self {
        Self::with_path(name, api_key, base_url, "/v1/chat/completions".to_string())
    }

    /// Named provider with a custom chat completions path.
    /// `base_url` must not include a trailing slash.
    pub fn with_path(
        name: impl Into<String>,
        api_key: String,
        base_url: String,
        chat_path: String,
    ) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(READ_TIMEOUT_SECS))
                .build()
                .expect("reqwest client"),
            provider_name: name.into(),
            api_key,
            base_url,
            chat_path,
            embedding_model: None,
            embedding_dim: None,
        }
    }

    /// Enable the embedding capability on this endpoint.
    pub fn with_embedding(mut self, model: impl Into<String>, dim: usize) -> Self {
        self.embedding_model = Some(model.into());
        self.embedding_dim = Some(dim);
        self
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        let body = build_request_body(req);
        let url = format!("{}{}", self.base_url, self.chat_path);

        debug!(model = %req.model, provider = %self.provider_name, "streaming chat request");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
            warn!(status, provider = %self.provider_name, "chat API error");
            return Err(ProviderError::from_status(status, &text, retry_after_ms));
        }

        consume_stream(resp, tx).await
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse> {
        let model = self
            .embedding_model
            .as_deref()
            .ok_or(ProviderError::UnsupportedCapability("embeddings"))?;

        let url = format!("{}/v1/embeddings", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "model": model, "input": texts }))
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, &text, None));
        }

        let parsed: EmbeddingsResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("malformed embeddings body: {e}")))?;

        let mut vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        if vectors.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        // Keep request order — some backends return out-of-order indices.
        vectors.truncate(texts.len());
        let dim = vectors[0].len();
        Ok(EmbedResponse { vectors, dim })
    }

    fn embedding_dim(&self) -> Option<usize> {
        self.embedding_dim
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut messages = vec![serde_json::json!({ "role": "system", "content": req.system })];
    for m in &req.messages {
        messages.push(message_to_json(m));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "stream": true,
        "stream_options": { "include_usage": true },
        "temperature": req.params.temperature,
        "top_p": req.params.top_p,
        "frequency_penalty": req.params.frequency_penalty,
        "presence_penalty": req.params.presence_penalty,
    });
    if let Some(max) = req.params.max_tokens {
        body["max_tokens"] = serde_json::json!(max);
    }

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::json!(tools);
    }

    body
}

fn message_to_json(m: &ChatMessage) -> serde_json::Value {
    match m.role {
        MessageRole::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": m.tool_call_id.as_deref().unwrap_or(""),
            "content": m.content,
        }),
        MessageRole::Assistant if !m.tool_calls.is_empty() => {
            let calls: Vec<serde_json::Value> = m
                .tool_calls
                .iter()
                .map(|c| {
                    serde_json::json!({
                        "id": c.id,
                        "type": "function",
                        "function": {
                            "name": c.name,
                            "arguments": c.arguments.to_string(),
                        }
                    })
                })
                .collect();
            serde_json::json!({
                "role": "assistant",
                "content": m.content,
                "tool_calls": calls,
            })
        }
        MessageRole::User if !m.images.is_empty() => {
            let mut parts = vec![serde_json::json!({ "type": "text", "text": m.content })];
            for img in &m.images {
                parts.push(serde_json::json!({
                    "type": "image_url",
                    "image_url": {
                        "url": format!("data:{};base64,{}", img.media_type, img.base64)
                    }
                }));
            }
            serde_json::json!({ "role": "user", "content": parts })
        }
        MessageRole::System => serde_json::json!({ "role": "system", "content": m.content }),
        MessageRole::User => serde_json::json!({ "role": "user", "content": m.content }),
        MessageRole::Assistant => serde_json::json!({ "role": "assistant", "content": m.content }),
    }
}

/// Drain the SSE byte stream, translating chunk deltas into StreamEvents.
async fn consume_stream(resp: reqwest::Response, tx: mpsc::Sender<StreamEvent>) -> Result<()> {
    let mut byte_stream = resp.bytes_stream();
    let mut lines = LineBuffer::default();

    // index → call id of tool calls currently streaming; the open one last.
    let mut call_ids: Vec<(u32, String)> = Vec::new();
    let mut open_call: Option<String> = None;
    let mut saw_content = false;

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk?;
        let text = String::from_utf8_lossy(&chunk);
        for line in lines.push(&text) {
            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                continue;
            }
            let parsed: serde_json::Value = match serde_json::from_str(data) {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "skipping malformed stream chunk");
                    continue;
                }
            };

            // Usage-only chunk (choices empty) arrives last with
            // stream_options.include_usage.
            if let Some(usage) = parsed.get("usage").filter(|u| !u.is_null()) {
                let input = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
                let output = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
                if send(&tx, StreamEvent::UsageUpdate { input_tokens: input, output_tokens: output })
                    .await
                    .is_err()
                {
                    return Ok(());
                }
            }

            let Some(delta) = parsed["choices"].get(0).map(|c| &c["delta"]) else {
                continue;
            };

            if let Some(content) = delta["content"].as_str() {
                if !content.is_empty() {
                    saw_content = true;
                    if send(&tx, StreamEvent::Text { delta: content.to_string() })
                        .await
                        .is_err()
                    {
                        return Ok(());
                    }
                }
            }

            if let Some(reasoning) = delta["reasoning_content"].as_str() {
                if !reasoning.is_empty()
                    && send(&tx, StreamEvent::Thinking { delta: reasoning.to_string() })
                        .await
                        .is_err()
                {
                    return Ok(());
                }
            }

            if let Some(tool_calls) = delta["tool_calls"].as_array() {
                for tc in tool_calls {
                    let index = tc["index"].as_u64().unwrap_or(0) as u32;
                    if let Some(id) = tc["id"].as_str() {
                        // New call starting at this index — close the previous one.
                        if let Some(prev) = open_call.take() {
                            if send(&tx, StreamEvent::ToolCallEnd { id: prev }).await.is_err() {
                                return Ok(());
                            }
                        }
                        let name = tc["function"]["name"].as_str().unwrap_or("").to_string();
                        call_ids.push((index, id.to_string()));
                        open_call = Some(id.to_string());
                        saw_content = true;
                        if send(
                            &tx,
                            StreamEvent::ToolCallStart { id: id.to_string(), name },
                        )
                        .await
                        .is_err()
                        {
                            return Ok(());
                        }
                    }
                    if let Some(args) = tc["function"]["arguments"].as_str() {
                        if !args.is_empty() {
                            let id = call_ids
                                .iter()
                                .rev()
                                .find(|(i, _)| *i == index)
                                .map(|(_, id)| id.clone());
                            if let Some(id) = id {
                                if send(
                                    &tx,
                                    StreamEvent::ToolCallArgsDelta {
                                        id,
                                        json_fragment: args.to_string(),
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
                }
            }
        }
    }

    if let Some(prev) = open_call.take() {
        if send(&tx, StreamEvent::ToolCallEnd { id: prev }).await.is_err() {
            return Ok(());
        }
    }

    if !saw_content {
        return Err(ProviderError::EmptyResponse);
    }

    let _ = tx.send(StreamEvent::Done).await;
    Ok(())
}

async fn send(
    tx: &mpsc::Sender<StreamEvent>,
    event: StreamEvent,
) -> std::result::Result<(), ()> {
    tx.send(event).await.map_err(|_| ())
}
