//! read_source — read-only introspection of the installed source tree.
//!
//! Root comes from `source.root` config (defaults to the process working
//! directory). Traversal out of the root is refused; this tool never writes.

use std::path::{Component, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use aster_core::types::AccessLevel;

use super::{arg_str, ToolCtx, ToolEntry, ToolError, ToolHandler};

const READ_MAX_BYTES: u64 = 128 * 1024;

pub fn entry() -> ToolEntry {
    ToolEntry {
        name: "read_source".to_string(),
        description: "Read a file from the agent's own source tree (read-only). Use \
                      for self-inspection when debugging behaviour."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the source root" }
            },
            "required": ["path"]
        }),
        required_access_level: AccessLevel::Owner,
        handler: Arc::new(ReadSource),
    }
}

struct ReadSource;

#[async_trait]
impl ToolHandler for ReadSource {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let raw = arg_str(&args, "path")?;
        let rel = PathBuf::from(raw);

        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, Component::ParentDir))
        {
            return Err(ToolError::BadArgs(
                "path must be relative, without '..'".to_string(),
            ));
        }

        let root = ctx
            .agent
            .store
            .get_config("source.root", json!(null))
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?
            .as_str()
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let path = root.join(&rel);
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ToolError::Failed(format!("{raw}: {e}")))?;
        if meta.is_dir() {
            let mut entries = tokio::fs::read_dir(&path)
                .await
                .map_err(|e| ToolError::Failed(e.to_string()))?;
            let mut names = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
            names.sort();
            return Ok(names.join("\n"));
        }
        if meta.len() > READ_MAX_BYTES {
            return Err(ToolError::Failed(format!(
                "{raw} is too large ({} bytes)",
                meta.len()
            )));
        }

        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Failed(format!("{raw}: {e}")))
    }
}
