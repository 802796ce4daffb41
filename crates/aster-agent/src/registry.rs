//! Tool dispatch — the single gate every requested call goes through.
//!
//! Order: name lookup (tools and abilities share one namespace) → access
//! gate (owner-only list, then level comparison) → schema validation →
//! handler. Every failure is rendered as an `"Error: …"` string result.

use serde_json::Value;
use tracing::{debug, warn};

use aster_guard::is_owner_only_tool;

use crate::tools::{validate_args, ToolCtx, ToolEntry, ToolError};

pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
}

impl ToolRegistry {
    /// Assemble the registry for one turn. Tool names must not collide with
    /// ability names — a duplicate registration is dropped with a warning.
    pub fn new(entries: Vec<ToolEntry>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let mut unique = Vec::with_capacity(entries.len());
        for entry in entries {
            if seen.insert(entry.name.clone()) {
                unique.push(entry);
            } else {
                warn!(tool = %entry.name, "duplicate tool name dropped from registry");
            }
        }
        Self { entries: unique }
    }

    pub fn get(&self, name: &str) -> Option<&ToolEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Tool specs the caller's access level may see.
    pub fn specs_for(&self, access: aster_core::types::AccessLevel) -> Vec<aster_provider::ToolSpec> {
        self.entries
            .iter()
            .filter(|e| access.satisfies(e.required_access_level))
            .map(|e| e.spec())
            .collect()
    }

    pub fn entries(&self) -> &[ToolEntry] {
        &self.entries
    }

    /// Dispatch one requested call. Always returns a string — errors become
    /// tool-result text the model can react to.
    pub async fn dispatch(&self, name: &str, args: Value, ctx: &ToolCtx) -> String {
        let Some(entry) = self.get(name) else {
            return format!("Error: unknown tool '{name}'");
        };

        // Owner-only tools are enforced here, not in the prompt. Group
        // provenance already downgraded effective_access, so an owner in a
        // group fails this gate too.
        if is_owner_only_tool(name) && !ctx.effective_access.is_owner() {
            debug!(tool = name, caller = %ctx.effective_access, "owner-only tool refused");
            return ToolError::AccessDenied.render();
        }

        if !ctx.effective_access.satisfies(entry.required_access_level) {
            debug!(
                tool = name,
                caller = %ctx.effective_access,
                required = %entry.required_access_level,
                "tool access refused"
            );
            return ToolError::AccessDenied.render();
        }

        let args = match args {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => {
                return ToolError::BadArgs(format!("expected an object, got {other}")).render()
            }
        };

        if let Err(e) = validate_args(&entry.parameters, &args) {
            return e.render();
        }

        debug!(tool = name, "dispatching tool call");
        match entry.handler.call(args, ctx).await {
            Ok(result) => result,
            Err(e) => e.render(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolHandler;
    use aster_core::types::AccessLevel;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(
            &self,
            args: serde_json::Map<String, Value>,
            _ctx: &ToolCtx,
        ) -> Result<String, ToolError> {
            Ok(args["text"].as_str().unwrap_or("").to_string())
        }
    }

    fn echo_entry(required: AccessLevel) -> ToolEntry {
        ToolEntry {
            name: "echo".to_string(),
            description: "echo text".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }),
            required_access_level: required,
            handler: Arc::new(Echo),
        }
    }

    #[test]
    fn duplicate_names_are_dropped() {
        let registry = ToolRegistry::new(vec![
            echo_entry(AccessLevel::Public),
            echo_entry(AccessLevel::Owner),
        ]);
        assert_eq!(registry.entries().len(), 1);
        assert_eq!(
            registry.get("echo").unwrap().required_access_level,
            AccessLevel::Public
        );
    }

    #[test]
    fn specs_respect_access_level() {
        let registry = ToolRegistry::new(vec![echo_entry(AccessLevel::Family)]);
        assert_eq!(registry.specs_for(AccessLevel::Owner).len(), 1);
        assert_eq!(registry.specs_for(AccessLevel::Public).len(), 0);
    }
}
