//! Tool ABI — one handler signature for every tool and ability.
//!
//! A handler receives the validated argument map plus an owned invocation
//! context and returns a plain string. Dispatch failures (`AccessDenied`,
//! `BadArgs`) are rendered as `"Error: …"` strings and become the tool-role
//! message the model sees next turn; they are never transport errors.

pub mod admin;
pub mod build;
pub mod exec;
pub mod files;
pub mod memory;
pub mod messaging;
pub mod schedule;
pub mod source;
pub mod subagent;
pub mod web_fetch;
pub mod web_search;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use aster_comm::InboundContext;
use aster_core::types::{AccessLevel, ChatKey};
use aster_store::types::User;

use crate::agent::AgentContext;

#[derive(Debug, Clone)]
pub enum ToolError {
    AccessDenied,
    BadArgs(String),
    Failed(String),
}

impl ToolError {
    /// The string form handed back to the model.
    pub fn render(&self) -> String {
        match self {
            ToolError::AccessDenied => "Error: access denied".to_string(),
            ToolError::BadArgs(msg) => format!("Error: bad arguments: {msg}"),
            ToolError::Failed(msg) => format!("Error: {msg}"),
        }
    }
}

/// Everything a handler may touch, owned so handlers stay `'static`.
#[derive(Clone)]
pub struct ToolCtx {
    pub agent: Arc<AgentContext>,
    pub caller: User,
    /// Caller access after group downgrade — what the gate actually used.
    pub effective_access: AccessLevel,
    pub session_id: String,
    pub chat: ChatKey,
    pub inbound: InboundContext,
}

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError>;
}

/// A registered tool: metadata plus its handler.
#[derive(Clone)]
pub struct ToolEntry {
    pub name: String,
    pub description: String,
    /// JSON Schema `{type: "object", properties, required}`.
    pub parameters: Value,
    pub required_access_level: AccessLevel,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolEntry {
    pub fn spec(&self) -> aster_provider::ToolSpec {
        aster_provider::ToolSpec {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Validate `args` against the entry's schema: required keys present, and
/// each known property matches its declared primitive type.
pub fn validate_args(schema: &Value, args: &Map<String, Value>) -> Result<(), ToolError> {
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required {
            let Some(key) = key.as_str() else { continue };
            if !args.contains_key(key) {
                return Err(ToolError::BadArgs(format!("missing required '{key}'")));
            }
        }
    }

    let Some(props) = schema.get("properties").and_then(|p| p.as_object()) else {
        return Ok(());
    };
    for (key, value) in args {
        let Some(decl) = props.get(key) else {
            // Unknown keys are tolerated — models pad calls with extras.
            continue;
        };
        let Some(expected) = decl.get("type").and_then(|t| t.as_str()) else {
            continue;
        };
        let ok = match expected {
            "string" => value.is_string(),
            "integer" => value.is_i64() || value.is_u64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            _ => true,
        };
        if !ok {
            return Err(ToolError::BadArgs(format!(
                "'{key}' should be {expected}"
            )));
        }
    }
    Ok(())
}

/// Fetch a required string argument.
pub fn arg_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::BadArgs(format!("missing required '{key}'")))
}

/// Fetch an optional string argument.
pub fn arg_str_opt<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key).and_then(|v| v.as_str())
}

/// Fetch an optional integer argument.
pub fn arg_i64(args: &Map<String, Value>, key: &str) -> Option<i64> {
    args.get(key).and_then(|v| v.as_i64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "limit": { "type": "integer" }
            },
            "required": ["query"]
        })
    }

    #[test]
    fn missing_required_key_is_bad_args() {
        let args = serde_json::json!({ "limit": 3 });
        let err = validate_args(&schema(), args.as_object().unwrap()).unwrap_err();
        assert!(matches!(err, ToolError::BadArgs(_)));
    }

    #[test]
    fn wrong_type_is_bad_args() {
        let args = serde_json::json!({ "query": 42 });
        let err = validate_args(&schema(), args.as_object().unwrap()).unwrap_err();
        assert!(err.render().contains("should be string"));
    }

    #[test]
    fn valid_args_pass_and_extras_are_tolerated() {
        let args = serde_json::json!({ "query": "x", "limit": 5, "extra": true });
        assert!(validate_args(&schema(), args.as_object().unwrap()).is_ok());
    }
}
