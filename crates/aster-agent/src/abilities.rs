//! Ability registry — tool-shaped plugins with DB-backed enable/disable,
//! per-ability config, and optional inbound pre-processing.
//!
//! When an inbound message carries a non-text input, enabled abilities are
//! scanned in registration order; the first one that produces a derived
//! string wins and the raw bytes never reach the model.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use aster_provider::{ChatMessage, ChatParams, ChatRequest, ImagePart, MessageRole};
use aster_store::types::AbilitySource;
use aster_store::Store;

use crate::error::Result;
use crate::tools::{ToolCtx, ToolEntry, ToolError, ToolHandler};

/// A non-text input extracted by a channel adapter.
#[derive(Debug, Clone)]
pub enum InboundPayload {
    Image(ImagePart),
}

impl InboundPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            InboundPayload::Image(_) => "image",
        }
    }
}

#[async_trait]
pub trait PreProcessor: Send + Sync {
    /// Whether this ability wants inputs of the payload's type.
    fn handles_input_type(&self, payload: &InboundPayload) -> bool;

    /// Produce a derived text for the payload, or `None` to pass.
    async fn pre_process(&self, payload: &InboundPayload, ctx: &ToolCtx) -> Option<String>;
}

/// A compiled-in ability. Its enabled flag and config live in the store and
/// survive restarts; the code ships with the binary.
pub struct BuiltinAbility {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
    pub default_enabled: bool,
    pub required_access_level: aster_core::types::AccessLevel,
    pub parameters: Value,
    pub default_config: Value,
    pub handler: Arc<dyn ToolHandler>,
    pub pre_processor: Option<Arc<dyn PreProcessor>>,
}

pub struct AbilityRegistry {
    builtins: Vec<BuiltinAbility>,
}

impl AbilityRegistry {
    pub fn with_builtins() -> Self {
        Self {
            builtins: vec![image_analysis_ability()],
        }
    }

    /// Mirror the compiled-in abilities into the store. Operator state
    /// (enabled, config) on existing rows is preserved.
    pub async fn sync(&self, store: &Store) -> Result<()> {
        for ability in &self.builtins {
            store
                .register_ability(
                    ability.name,
                    ability.version,
                    ability.description,
                    AbilitySource::Builtin,
                    ability.default_enabled,
                )
                .await?;
        }
        Ok(())
    }

    /// Tool entries for the enabled abilities — these join the tool
    /// registry's shared namespace for dispatch.
    pub async fn tool_entries(&self, store: &Store) -> Result<Vec<ToolEntry>> {
        let mut entries = Vec::new();
        for ability in &self.builtins {
            let enabled = store
                .get_ability(ability.name)
                .await?
                .map(|rec| rec.enabled)
                .unwrap_or(ability.default_enabled);
            if !enabled {
                continue;
            }
            entries.push(ToolEntry {
                name: ability.name.to_string(),
                description: ability.description.to_string(),
                parameters: ability.parameters.clone(),
                required_access_level: ability.required_access_level,
                handler: Arc::clone(&ability.handler),
            });
        }
        Ok(entries)
    }

    /// Run the pre-processing chain for one payload. First enabled ability
    /// that handles the type and returns text short-circuits the rest.
    pub async fn pre_process(
        &self,
        store: &Store,
        payload: &InboundPayload,
        ctx: &ToolCtx,
    ) -> Option<String> {
        for ability in &self.builtins {
            let Some(pre) = &ability.pre_processor else {
                continue;
            };
            if !pre.handles_input_type(payload) {
                continue;
            }
            let enabled = match store.get_ability(ability.name).await {
                Ok(Some(rec)) => rec.enabled,
                Ok(None) => ability.default_enabled,
                Err(e) => {
                    warn!(ability = ability.name, error = %e, "ability lookup failed");
                    continue;
                }
            };
            if !enabled {
                continue;
            }
            if let Some(derived) = pre.pre_process(payload, ctx).await {
                debug!(ability = ability.name, "pre-processor produced derived text");
                return Some(derived);
            }
        }
        None
    }

    /// The ability's effective config: stored values merged over defaults.
    pub async fn merged_config(&self, store: &Store, name: &str) -> Value {
        let default = self
            .builtins
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.default_config.clone())
            .unwrap_or_else(|| serde_json::json!({}));
        let stored = match store.get_ability(name).await {
            Ok(Some(rec)) => rec.config,
            _ => serde_json::json!({}),
        };
        merge_json(default, stored)
    }
}

/// Shallow merge: keys in `over` win.
fn merge_json(base: Value, over: Value) -> Value {
    match (base, over) {
        (Value::Object(mut base), Value::Object(over)) => {
            for (k, v) in over {
                base.insert(k, v);
            }
            Value::Object(base)
        }
        (base, Value::Null) => base,
        (_, over) => over,
    }
}

// ---------------------------------------------------------------------------
// image_analysis — vision captioning pre-processor
// ---------------------------------------------------------------------------

fn image_analysis_ability() -> BuiltinAbility {
    let handler = Arc::new(ImageAnalysisHandler);
    BuiltinAbility {
        name: "image_analysis",
        version: "0.2.0",
        description: "Describe an image so the conversation can refer to its contents",
        default_enabled: true,
        required_access_level: aster_core::types::AccessLevel::Public,
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "image_base64": { "type": "string", "description": "Base64 image payload" },
                "media_type": { "type": "string", "description": "MIME type, default image/jpeg" },
                "question": { "type": "string", "description": "What to look for" }
            },
            "required": ["image_base64"]
        }),
        default_config: serde_json::json!({ "max_caption_chars": 1200 }),
        handler: handler.clone(),
        pre_processor: Some(handler),
    }
}

struct ImageAnalysisHandler;

impl ImageAnalysisHandler {
    async fn caption(
        &self,
        ctx: &ToolCtx,
        image: &ImagePart,
        question: &str,
    ) -> std::result::Result<String, String> {
        let provider = ctx.agent.chat_provider().await;
        let model = ctx.agent.active_model().await;

        let mut message = ChatMessage::text(MessageRole::User, question);
        message.images.push(image.clone());

        let req = ChatRequest {
            model: model.model_id,
            system: "You describe images precisely and concisely for a conversational \
                     assistant. Mention visible text verbatim."
                .to_string(),
            messages: vec![message],
            tools: Vec::new(),
            params: ChatParams {
                temperature: 0.0,
                max_tokens: Some(512),
                thinking_budget: None,
                ..ChatParams::default()
            },
        };

        let mut caption = crate::conversation::collect_text(provider, &req)
            .await
            .map_err(|e| e.to_string())?;

        // Stored config merged over the ability's defaults.
        let config = ctx
            .agent
            .abilities
            .merged_config(&ctx.agent.store, "image_analysis")
            .await;
        let max_chars = config
            .get("max_caption_chars")
            .and_then(|v| v.as_u64())
            .unwrap_or(1200) as usize;
        if caption.chars().count() > max_chars {
            caption = caption.chars().take(max_chars).collect();
            caption.push('…');
        }
        Ok(caption)
    }
}

#[async_trait]
impl ToolHandler for ImageAnalysisHandler {
    async fn call(
        &self,
        args: serde_json::Map<String, Value>,
        ctx: &ToolCtx,
    ) -> std::result::Result<String, ToolError> {
        let base64 = crate::tools::arg_str(&args, "image_base64")?;
        let media_type = crate::tools::arg_str_opt(&args, "media_type").unwrap_or("image/jpeg");
        let question = crate::tools::arg_str_opt(&args, "question")
            .unwrap_or("Describe this image in detail.");

        let image = ImagePart {
            media_type: media_type.to_string(),
            base64: base64.to_string(),
        };
        self.caption(ctx, &image, question)
            .await
            .map_err(ToolError::Failed)
    }
}

#[async_trait]
impl PreProcessor for ImageAnalysisHandler {
    fn handles_input_type(&self, payload: &InboundPayload) -> bool {
        matches!(payload, InboundPayload::Image(_))
    }

    async fn pre_process(&self, payload: &InboundPayload, ctx: &ToolCtx) -> Option<String> {
        let InboundPayload::Image(image) = payload;
        match self
            .caption(ctx, image, "Describe this image in detail.")
            .await
        {
            Ok(caption) => Some(format!("[Image received — description]\n{caption}")),
            Err(e) => {
                warn!(error = %e, "image captioning failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_json_overlays_keys() {
        let merged = merge_json(
            serde_json::json!({ "a": 1, "b": 2 }),
            serde_json::json!({ "b": 3, "c": 4 }),
        );
        assert_eq!(merged, serde_json::json!({ "a": 1, "b": 3, "c": 4 }));
    }
}
