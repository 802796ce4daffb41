//! Model registry — the `provider.models` / `provider.embedding_models`
//! config entries, and provider construction from a selected entry.
//!
//! Context window and reserved output tokens are properties of the model
//! entry, not globals: the context manager re-reads them every turn, so a
//! mid-session model switch changes the budget on the next turn.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::anthropic::AnthropicProvider;
use crate::error::{ProviderError, Result};
use crate::openai::OpenAiProvider;
use crate::provider::Provider;
use crate::types::ChatParams;

/// One entry of the `provider.models` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Stable key referenced by `provider.active_model` and overrides.
    pub key: String,
    #[serde(default)]
    pub label: String,
    /// Driver id: "openai", "openai-compat", or "anthropic".
    pub driver: String,
    /// Vendor model identifier sent on the wire.
    pub model_id: String,
    #[serde(default = "default_context_window")]
    pub context_window: u32,
    #[serde(default = "default_reserved_output")]
    pub reserved_output_tokens: u32,
    #[serde(default)]
    pub params: Option<ChatParams>,
    /// When true, surfaced Thinking streams are shown to the user.
    #[serde(default)]
    pub reasoning_visible: bool,
    /// Config key (under `credential.`) holding this entry's API key.
    #[serde(default)]
    pub credential_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ModelEntry {
    /// Usable prompt budget for this model.
    pub fn usable_budget(&self) -> u32 {
        self.context_window.saturating_sub(self.reserved_output_tokens)
    }
}

fn default_context_window() -> u32 {
    128_000
}

fn default_reserved_output() -> u32 {
    8_192
}

/// One entry of the `provider.embedding_models` list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingEntry {
    pub key: String,
    pub driver: String,
    pub model_id: String,
    pub dimensions: usize,
    #[serde(default)]
    pub credential_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Parse the `provider.models` config value.
pub fn parse_model_list(value: &serde_json::Value) -> Vec<ModelEntry> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

/// Parse the `provider.embedding_models` config value.
pub fn parse_embedding_list(value: &serde_json::Value) -> Vec<EmbeddingEntry> {
    serde_json::from_value(value.clone()).unwrap_or_default()
}

/// Find a model entry by key.
pub fn find_model<'a>(models: &'a [ModelEntry], key: &str) -> Option<&'a ModelEntry> {
    models.iter().find(|m| m.key == key)
}

/// Build a chat provider for a model entry. `credential` is the resolved
/// secret for `entry.credential_key` (empty for keyless local endpoints).
pub fn build_provider(entry: &ModelEntry, credential: Option<String>) -> Result<Arc<dyn Provider>> {
    let api_key = credential.unwrap_or_default();
    match entry.driver.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicProvider::new(
            api_key,
            entry.base_url.clone(),
        ))),
        "openai" => Ok(Arc::new(OpenAiProvider::new(
            entry.key.clone(),
            api_key,
            entry
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
        ))),
        "openai-compat" => {
            let base_url = entry.base_url.clone().ok_or_else(|| {
                ProviderError::BadRequest(format!(
                    "model '{}' uses openai-compat but has no base_url",
                    entry.key
                ))
            })?;
            Ok(Arc::new(OpenAiProvider::new(
                entry.key.clone(),
                api_key,
                base_url,
            )))
        }
        other => Err(ProviderError::BadRequest(format!(
            "unknown provider driver: {other}"
        ))),
    }
}

/// Build an embedding provider for an embedding entry.
pub fn build_embedding_provider(
    entry: &EmbeddingEntry,
    credential: Option<String>,
) -> Result<Arc<dyn Provider>> {
    let api_key = credential.unwrap_or_default();
    match entry.driver.as_str() {
        "openai" | "openai-compat" => {
            let base_url = entry
                .base_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com".to_string());
            Ok(Arc::new(
                OpenAiProvider::new(entry.key.clone(), api_key, base_url)
                    .with_embedding(entry.model_id.clone(), entry.dimensions),
            ))
        }
        other => Err(ProviderError::BadRequest(format!(
            "unknown embedding driver: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_list_parses_and_budgets() {
        let value = serde_json::json!([{
            "key": "main",
            "label": "Primary",
            "driver": "anthropic",
            "model_id": "claude-sonnet-4-5",
            "context_window": 200000,
            "reserved_output_tokens": 16000,
            "reasoning_visible": true,
            "credential_key": "anthropic_api_key"
        }]);
        let models = parse_model_list(&value);
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].usable_budget(), 184_000);
        assert!(find_model(&models, "main").is_some());
        assert!(find_model(&models, "nope").is_none());
    }

    #[test]
    fn compat_without_base_url_is_rejected() {
        let entry = ModelEntry {
            key: "local".into(),
            label: String::new(),
            driver: "openai-compat".into(),
            model_id: "llama".into(),
            context_window: 8192,
            reserved_output_tokens: 1024,
            params: None,
            reasoning_visible: false,
            credential_key: None,
            base_url: None,
        };
        assert!(matches!(
            build_provider(&entry, None),
            Err(ProviderError::BadRequest(_))
        ));
    }
}
