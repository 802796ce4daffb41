//! Scheduling tools — create, list, cancel timed tasks. Executed tasks
//! re-enter the conversation as if the creator had sent the payload.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use aster_core::types::AccessLevel;
use aster_store::types::ScheduleType;

use super::{arg_i64, arg_str, ToolCtx, ToolEntry, ToolError, ToolHandler};

pub fn create_entry() -> ToolEntry {
    ToolEntry {
        name: "schedule_task".to_string(),
        description: "Schedule a message to yourself. Types: 'once' with an ISO \
                      timestamp, 'interval' with seconds, 'cron' with a cron \
                      expression. The payload runs as if the user had sent it."
            .to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Short task name" },
                "schedule_type": { "type": "string", "description": "once | interval | cron" },
                "schedule_value": {
                    "type": "string",
                    "description": "Timestamp, seconds, or cron expression"
                },
                "payload": { "type": "string", "description": "Message to run when due" }
            },
            "required": ["name", "schedule_type", "schedule_value", "payload"]
        }),
        required_access_level: AccessLevel::Family,
        handler: Arc::new(ScheduleCreate),
    }
}

struct ScheduleCreate;

#[async_trait]
impl ToolHandler for ScheduleCreate {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let name = arg_str(&args, "name")?;
        let type_str = arg_str(&args, "schedule_type")?;
        let schedule_value = arg_str(&args, "schedule_value")?;
        let payload = arg_str(&args, "payload")?;

        let schedule_type = ScheduleType::from_str(type_str)
            .map_err(|e| ToolError::BadArgs(e))?;

        let task = aster_scheduler::create_task(
            &ctx.agent.store,
            name,
            schedule_type,
            schedule_value,
            payload,
            ctx.caller.id,
        )
        .await
        .map_err(|e| ToolError::Failed(e.to_string()))?;

        Ok(format!(
            "Scheduled task #{} '{}' — next run {}",
            task.id,
            task.name,
            task.next_run.as_deref().unwrap_or("unknown")
        ))
    }
}

pub fn list_entry() -> ToolEntry {
    ToolEntry {
        name: "list_scheduled_tasks".to_string(),
        description: "List scheduled tasks with their next run times.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        }),
        required_access_level: AccessLevel::Family,
        handler: Arc::new(ScheduleList),
    }
}

struct ScheduleList;

#[async_trait]
impl ToolHandler for ScheduleList {
    async fn call(&self, _args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let tasks = ctx
            .agent
            .store
            .list_tasks(false)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        if tasks.is_empty() {
            return Ok("No scheduled tasks.".to_string());
        }
        let mut out = String::new();
        for task in tasks {
            out.push_str(&format!(
                "#{} '{}' [{} {}] {} — next: {}, runs: {}\n",
                task.id,
                task.name,
                task.schedule_type,
                task.schedule_value,
                if task.enabled { "enabled" } else { "disabled" },
                task.next_run.as_deref().unwrap_or("-"),
                task.run_count
            ));
        }
        Ok(out.trim_end().to_string())
    }
}

pub fn cancel_entry() -> ToolEntry {
    ToolEntry {
        name: "cancel_scheduled_task".to_string(),
        description: "Delete a scheduled task by id.".to_string(),
        parameters: serde_json::json!({
            "type": "object",
            "properties": {
                "task_id": { "type": "integer", "description": "Task id to delete" }
            },
            "required": ["task_id"]
        }),
        required_access_level: AccessLevel::Family,
        handler: Arc::new(ScheduleCancel),
    }
}

struct ScheduleCancel;

#[async_trait]
impl ToolHandler for ScheduleCancel {
    async fn call(&self, args: Map<String, Value>, ctx: &ToolCtx) -> Result<String, ToolError> {
        let task_id = arg_i64(&args, "task_id")
            .ok_or_else(|| ToolError::BadArgs("missing required 'task_id'".to_string()))?;
        let deleted = ctx
            .agent
            .store
            .delete_task(task_id)
            .await
            .map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(if deleted {
            format!("Deleted task #{task_id}.")
        } else {
            format!("No task with id {task_id}.")
        })
    }
}
