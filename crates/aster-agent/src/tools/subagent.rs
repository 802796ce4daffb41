//! Sub-agent tools — spawn a background conversation and check on it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use aster_core::types::AccessLevel;

use super::{arg_str, arg_str_opt, ToolCtx, ToolEntry, ToolError, ToolHandler};

pub fn spawn_entry() -> ToolEntry {
    ToolEntry {
        name: "spawn_subagent".to_string(),
        description: "Run a task in a background conversation. The result is delivered \
                      to this chat when it finishes. Use for long or parallel work."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "Self-contained task description" },
                "context": { "type": "string", "description": "Extra context the task needs" }
            },
            "required": ["task"]
        }),
        required_access_level: AccessLevel::Family,
        handler: Arc::new(SpawnSubagent),
    }
}

struct SpawnSubagent;

#[async_trait]
impl ToolHandler for SpawnSubagent {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let task = arg_str(&args, "task")?;
        let context_note = arg_str_opt(&args, "context");

        // Spawn rejections come back as plain strings so the model can
        // decide what to do (wait, tell the user, do it inline).
        match ctx
            .agent
            .subagents
            .spawn(
                Arc::clone(&ctx.agent),
                task,
                &ctx.session_id,
                ctx.caller.clone(),
                context_note,
            )
            .await
        {
            Ok(run_id) => Ok(format!(
                "Sub-agent started (run {run_id}). I'll post the result here when it finishes."
            )),
            Err(message) => Ok(message),
        }
    }
}

pub fn status_entry() -> ToolEntry {
    ToolEntry {
        name: "subagent_status".to_string(),
        description: "Check sub-agent runs: one by id, or all active ones.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "run_id": { "type": "string", "description": "Specific run id (optional)" }
            },
            "required": []
        }),
        required_access_level: AccessLevel::Family,
        handler: Arc::new(SubagentStatus),
    }
}

struct SubagentStatus;

#[async_trait]
impl ToolHandler for SubagentStatus {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        if let Some(run_id) = arg_str_opt(&args, "run_id") {
            let run = ctx
                .agent
                .subagents
                .get_run(run_id)
                .await
                .map_err(|e| ToolError::Failed(e.to_string()))?;
            return Ok(match run {
                Some(run) => format!(
                    "Run {} — {} (started {}){}{}",
                    run.run_id,
                    run.status,
                    run.started_at,
                    run.result
                        .as_deref()
                        .map(|r| format!("\nresult: {r}"))
                        .unwrap_or_default(),
                    run.error
                        .as_deref()
                        .map(|e| format!("\nerror: {e}"))
                        .unwrap_or_default(),
                ),
                None => format!("No run with id {run_id}."),
            });
        }

        let active = ctx
            .agent
            .subagents
            .list_active(Some(&ctx.session_id))
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        if active.is_empty() {
            return Ok("No active sub-agent runs for this conversation.".to_string());
        }
        let mut out = String::new();
        for run in active {
            out.push_str(&format!(
                "{} — {} — {}\n",
                run.run_id,
                run.status,
                run.task.chars().take(80).collect::<String>()
            ));
        }
        Ok(out.trim_end().to_string())
    }
}
