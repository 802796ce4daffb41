//! File tools. Reads and listings stay inside the workspace; writes go
//! through the write-scope gate (workspace, conversation workdir, or the
//! abilities subtree — never core source).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::info;

use aster_core::types::AccessLevel;
use aster_guard::check_write_scope;

use super::{arg_str, ToolCtx, ToolEntry, ToolError, ToolHandler};

const READ_MAX_BYTES: u64 = 256 * 1024;

pub fn read_entry() -> ToolEntry {
    ToolEntry {
        name: "file_read".to_string(),
        description: "Read a text file from the workspace.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path, absolute or workspace-relative" }
            },
            "required": ["path"]
        }),
        required_access_level: AccessLevel::Family,
        handler: Arc::new(FileRead),
    }
}

struct FileRead;

#[async_trait]
impl ToolHandler for FileRead {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let path = resolve(ctx, arg_str(&args, "path")?);

        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| ToolError::Failed(format!("{}: {e}", path.display())))?;
        if !meta.is_file() {
            return Err(ToolError::Failed(format!("{} is not a file", path.display())));
        }
        if meta.len() > READ_MAX_BYTES {
            return Err(ToolError::Failed(format!(
                "{} is too large ({} bytes, max {READ_MAX_BYTES})",
                path.display(),
                meta.len()
            )));
        }

        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| ToolError::Failed(format!("{}: {e}", path.display())))
    }
}

pub fn write_entry() -> ToolEntry {
    ToolEntry {
        name: "file_write".to_string(),
        description: "Write content to a file. Writable roots: the workspace and the \
                      abilities directory. Parent directories are created."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Destination path" },
                "content": { "type": "string", "description": "Full file content" },
                "append": { "type": "boolean", "description": "Append instead of overwrite" }
            },
            "required": ["path", "content"]
        }),
        required_access_level: AccessLevel::Owner,
        handler: Arc::new(FileWrite),
    }
}

struct FileWrite;

#[async_trait]
impl ToolHandler for FileWrite {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let path = resolve(ctx, arg_str(&args, "path")?);
        let content = arg_str(&args, "content")?;
        let append = args.get("append").and_then(|v| v.as_bool()).unwrap_or(false);

        let roots = [
            ctx.agent.workspace_dir.clone(),
            ctx.agent.abilities_dir.clone(),
        ];
        if let Err(reason) = check_write_scope(&path, &roots) {
            return Ok(format!("Error: write refused: {reason}"));
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::Failed(format!("mkdir {}: {e}", parent.display())))?;
        }

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| ToolError::Failed(format!("{}: {e}", path.display())))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|e| ToolError::Failed(e.to_string()))?;
        } else {
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| ToolError::Failed(format!("{}: {e}", path.display())))?;
        }

        info!(path = %path.display(), bytes = content.len(), append, "file written");
        Ok(format!(
            "Wrote {} bytes to {}",
            content.len(),
            path.display()
        ))
    }
}

pub fn list_entry() -> ToolEntry {
    ToolEntry {
        name: "file_list".to_string(),
        description: "List a directory in the workspace.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory (default: workspace root)" }
            },
            "required": []
        }),
        required_access_level: AccessLevel::Family,
        handler: Arc::new(FileList),
    }
}

struct FileList;

#[async_trait]
impl ToolHandler for FileList {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let path = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => resolve(ctx, p),
            None => ctx.agent.workspace_dir.clone(),
        };

        let mut entries = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| ToolError::Failed(format!("{}: {e}", path.display())))?;

        let mut names = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let kind = match entry.file_type().await {
                Ok(t) if t.is_dir() => "dir",
                Ok(_) => "file",
                Err(_) => "?",
            };
            names.push(format!("{kind}  {}", entry.file_name().to_string_lossy()));
        }
        names.sort();

        if names.is_empty() {
            Ok(format!("{} is empty", path.display()))
        } else {
            Ok(names.join("\n"))
        }
    }
}

/// Relative paths resolve against the workspace.
fn resolve(ctx: &ToolCtx, raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        ctx.agent.workspace_dir.join(path)
    }
}
