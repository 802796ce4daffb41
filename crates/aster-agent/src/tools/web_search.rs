//! web_search — thin client over a configurable search API endpoint.
//!
//! The engine is configured with `web_search.endpoint` (an HTTP JSON API
//! returning `{results: [{title, url, snippet?|description?}]}`) plus an
//! optional `credential.web_search_api_key`. Unconfigured installs get a
//! clear error string rather than a broken call.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use aster_core::types::AccessLevel;

use super::{arg_i64, arg_str, ToolCtx, ToolEntry, ToolError, ToolHandler};

pub fn entry() -> ToolEntry {
    ToolEntry {
        name: "web_search".to_string(),
        description: "Search the web. Returns titles, URLs and snippets.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "limit": { "type": "integer", "description": "Max results (default 5)" }
            },
            "required": ["query"]
        }),
        required_access_level: AccessLevel::Public,
        handler: Arc::new(WebSearch),
    }
}

struct WebSearch;

#[async_trait]
impl ToolHandler for WebSearch {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let query = arg_str(&args, "query")?;
        let limit = arg_i64(&args, "limit").unwrap_or(5).clamp(1, 10);

        let endpoint = ctx
            .agent
            .store
            .get_config("web_search.endpoint", json!(null))
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        let Some(endpoint) = endpoint.as_str().map(String::from) else {
            return Ok(
                "Error: web search is not configured (set web_search.endpoint)".to_string(),
            );
        };

        let api_key = ctx
            .agent
            .store
            .get_credential("web_search_api_key")
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        let mut req = ctx
            .agent
            .http
            .post(&endpoint)
            .json(&json!({ "query": query, "limit": limit }));
        if let Some(key) = api_key {
            req = req.bearer_auth(key);
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(e) => return Ok(format!("Error: search request failed: {e}")),
        };
        if !resp.status().is_success() {
            return Ok(format!("Error: search API returned HTTP {}", resp.status()));
        }
        let body: Value = match resp.json().await {
            Ok(body) => body,
            Err(e) => return Ok(format!("Error: malformed search response: {e}")),
        };

        let results = body
            .get("results")
            .and_then(|r| r.as_array())
            .cloned()
            .unwrap_or_default();
        if results.is_empty() {
            return Ok(format!("No results for '{query}'."));
        }

        let mut out = String::new();
        for (i, result) in results.iter().take(limit as usize).enumerate() {
            let title = result.get("title").and_then(|v| v.as_str()).unwrap_or("(untitled)");
            let url = result.get("url").and_then(|v| v.as_str()).unwrap_or("");
            let snippet = result
                .get("snippet")
                .or_else(|| result.get("description"))
                .and_then(|v| v.as_str())
                .unwrap_or("");
            out.push_str(&format!("{}. {title}\n   {url}\n", i + 1));
            if !snippet.is_empty() {
                out.push_str(&format!("   {snippet}\n"));
            }
        }
        Ok(out.trim_end().to_string())
    }
}
