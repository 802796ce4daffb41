//! Memory tools — search, store, delete.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use aster_core::types::AccessLevel;
use aster_memory::{RecallQuery, StoreOutcome};

use super::{arg_i64, arg_str, arg_str_opt, ToolCtx, ToolEntry, ToolError, ToolHandler};

pub fn search_entry() -> ToolEntry {
    ToolEntry {
        name: "memory_search".to_string(),
        description: "Search long-term memory by meaning. Returns the most similar \
                      memories with their ids and similarity scores."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "What to look for" },
                "limit": { "type": "integer", "description": "Max results (default 5)" },
                "category": { "type": "string", "description": "Optional category filter" }
            },
            "required": ["query"]
        }),
        required_access_level: AccessLevel::Public,
        handler: Arc::new(MemorySearch),
    }
}

struct MemorySearch;

#[async_trait]
impl ToolHandler for MemorySearch {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let query = arg_str(&args, "query")?;
        let limit = arg_i64(&args, "limit").unwrap_or(5).clamp(1, 25) as usize;

        let mut q = RecallQuery::new(query, ctx.effective_access);
        q.limit = limit;
        q.category = arg_str_opt(&args, "category").map(String::from);
        q.user_id = Some(ctx.caller.id);

        let hits = ctx
            .agent
            .memory
            .read()
            .await
            .recall(&q)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        if hits.is_empty() {
            return Ok("No matching memories.".to_string());
        }
        let mut out = String::new();
        for hit in hits {
            out.push_str(&format!(
                "#{} [{}] (similarity {:.2}) {}\n",
                hit.row.id, hit.row.category, hit.similarity, hit.row.content
            ));
        }
        Ok(out.trim_end().to_string())
    }
}

pub fn store_entry() -> ToolEntry {
    ToolEntry {
        name: "memory_store".to_string(),
        description: "Save a durable fact to long-term memory. Near-duplicates are \
                      skipped; conflicting versions of the same fact update in place."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The fact to remember" },
                "category": {
                    "type": "string",
                    "description": "fact, preference, personal_info, family, health, medical, context"
                },
                "importance": { "type": "number", "description": "0.0–1.0, default 0.5" }
            },
            "required": ["content"]
        }),
        required_access_level: AccessLevel::Family,
        handler: Arc::new(MemoryStore),
    }
}

struct MemoryStore;

#[async_trait]
impl ToolHandler for MemoryStore {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let content = arg_str(&args, "content")?;
        let category = arg_str_opt(&args, "category").unwrap_or("fact");
        let importance = args
            .get("importance")
            .and_then(|v| v.as_f64())
            .unwrap_or(0.5)
            .clamp(0.0, 1.0);

        let outcome = ctx
            .agent
            .memory
            .read()
            .await
            .store_if_new(content, category, "user_confirmed", Some(ctx.caller.id), importance)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        Ok(match outcome {
            StoreOutcome::Inserted(id) => format!("Stored memory #{id}."),
            StoreOutcome::Updated(id) => format!("Updated existing memory #{id}."),
            StoreOutcome::Skipped => "Already known; nothing stored.".to_string(),
        })
    }
}

pub fn delete_entry() -> ToolEntry {
    ToolEntry {
        name: "memory_delete".to_string(),
        description: "Delete memory entries by id (comma-separated). Destructive."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "memory_ids": {
                    "type": "string",
                    "description": "Comma-separated ids, e.g. \"35,57\""
                }
            },
            "required": ["memory_ids"]
        }),
        required_access_level: AccessLevel::Family,
        handler: Arc::new(MemoryDelete),
    }
}

struct MemoryDelete;

#[async_trait]
impl ToolHandler for MemoryDelete {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let raw = arg_str(&args, "memory_ids")?;
        let ids: Vec<i64> = raw
            .split(',')
            .map(|s| s.trim().parse::<i64>())
            .collect::<Result<_, _>>()
            .map_err(|_| ToolError::BadArgs(format!("invalid memory ids: {raw}")))?;
        if ids.is_empty() {
            return Err(ToolError::BadArgs("no memory ids provided".to_string()));
        }

        let deleted = ctx
            .agent
            .memory
            .read()
            .await
            .delete(&ids)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;

        Ok(if deleted > 0 {
            format!("Deleted {deleted} memory entries.")
        } else {
            format!("No memory entries found with ids: {raw}")
        })
    }
}
