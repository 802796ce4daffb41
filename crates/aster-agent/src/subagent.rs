//! Sub-agent manager — bounded background conversations.
//!
//! A spawn creates a run row, then drives the same conversation loop against
//! a fresh ephemeral session. Results are delivered back to the originating
//! chat through the delivery callback the channel registered. Spawning never
//! elevates: the sub-agent dispatches tools with the parent session owner's
//! access level.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aster_comm::InboundContext;
use aster_provider::ImagePart;
use aster_store::types::{RunStatus, SubAgentRun, User};
use aster_store::Store;

use crate::agent::AgentContext;
use crate::conversation::{self, TurnInput};
use crate::error::Result;

pub const DEFAULT_MAX_CONCURRENT: i64 = 2;
pub const DEFAULT_TIMEOUT_SECS: i64 = 300;
/// Delivered results are clipped to stay inside platform message limits.
const RESULT_DELIVERY_MAX_CHARS: usize = 3500;

pub struct SubAgentManager {
    store: Store,
    running: DashMap<String, CancellationToken>,
}

impl SubAgentManager {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            running: DashMap::new(),
        }
    }

    /// Spawn a background run. Rejections (disabled, over the concurrency
    /// cap) come back as `Err(user-visible string)` so the calling tool can
    /// hand them straight to the model.
    pub async fn spawn(
        &self,
        ctx: Arc<AgentContext>,
        task: &str,
        parent_session_id: &str,
        caller: User,
        context_note: Option<&str>,
    ) -> std::result::Result<String, String> {
        let enabled = self
            .store
            .get_config("subagents.enabled", json!(true))
            .await
            .ok()
            .and_then(|v| v.as_bool())
            .unwrap_or(true);
        if !enabled {
            return Err("Error: sub-agents are disabled".to_string());
        }

        let max_concurrent = self
            .store
            .get_config("subagents.max_concurrent", json!(DEFAULT_MAX_CONCURRENT))
            .await
            .ok()
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_MAX_CONCURRENT);
        if self.running.len() as i64 >= max_concurrent {
            return Err(format!(
                "Error: sub-agent limit reached ({max_concurrent} running); try again when one finishes"
            ));
        }

        let run = self
            .store
            .create_run(parent_session_id, task)
            .await
            .map_err(|e| format!("Error: could not create sub-agent run: {e}"))?;

        let timeout_secs = self
            .store
            .get_config("subagents.timeout_seconds", json!(DEFAULT_TIMEOUT_SECS))
            .await
            .ok()
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .max(1) as u64;

        let token = CancellationToken::new();
        self.running.insert(run.run_id.clone(), token.clone());

        let full_task = match context_note {
            Some(note) if !note.is_empty() => format!("{task}\n\nContext:\n{note}"),
            _ => task.to_string(),
        };

        info!(run_id = %run.run_id, parent = parent_session_id, "sub-agent spawned");
        let run_id = run.run_id.clone();
        let parent = parent_session_id.to_string();
        tokio::spawn(async move {
            execute_run(ctx, run_id, full_task, parent, caller, token, timeout_secs).await;
        });

        Ok(run.run_id)
    }

    pub async fn list_active(&self, parent_session_id: Option<&str>) -> Result<Vec<SubAgentRun>> {
        Ok(self.store.list_active_runs(parent_session_id).await?)
    }

    pub async fn get_run(&self, run_id: &str) -> Result<Option<SubAgentRun>> {
        Ok(self.store.get_run(run_id).await?)
    }

    /// Cancel every in-flight run spawned from a session.
    pub async fn cancel_by_session(&self, parent_session_id: &str) -> Result<Vec<String>> {
        let cancelled = self.store.cancel_runs_by_session(parent_session_id).await?;
        for run_id in &cancelled {
            if let Some((_, token)) = self.running.remove(run_id) {
                token.cancel();
            }
        }
        Ok(cancelled)
    }

    pub(crate) fn finish(&self, run_id: &str) {
        self.running.remove(run_id);
    }
}

async fn execute_run(
    ctx: Arc<AgentContext>,
    run_id: String,
    task: String,
    parent_session_id: String,
    caller: User,
    token: CancellationToken,
    timeout_secs: u64,
) {
    let _ = ctx.store.mark_run_running(&run_id).await;

    // Fresh ephemeral session keyed by the run id — never collides with a
    // chat session, gets its own system prompt.
    let inbound = InboundContext::direct("subagent", run_id.clone());
    let input = TurnInput {
        inbound,
        user: caller,
        text: task,
        attachments: Vec::<ImagePart>::new(),
    };

    let outcome = tokio::select! {
        _ = token.cancelled() => Err("cancelled".to_string()),
        run = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            conversation::handle_turn(&ctx, input),
        ) => match run {
            Err(_) => Err(format!("timed out after {timeout_secs}s")),
            Ok(Err(e)) => Err(e.user_message()),
            Ok(Ok(reply)) => Ok(reply),
        },
    };

    match outcome {
        Ok(reply) => {
            let _ = ctx
                .store
                .finish_run(
                    &run_id,
                    RunStatus::Completed,
                    Some(&reply.text),
                    None,
                    reply.input_tokens as i64,
                    reply.output_tokens as i64,
                )
                .await;
            deliver(&ctx, &run_id, &parent_session_id, &reply.text, true);
        }
        Err(reason) => {
            warn!(run_id = %run_id, reason, "sub-agent run failed");
            let status = if reason == "cancelled" {
                RunStatus::Cancelled
            } else {
                RunStatus::Failed
            };
            let _ = ctx
                .store
                .finish_run(&run_id, status, None, Some(&reason), 0, 0)
                .await;
            if status == RunStatus::Failed {
                deliver(
                    &ctx,
                    &run_id,
                    &parent_session_id,
                    &format!("Background task failed: {reason}"),
                    false,
                );
            }
        }
    }

    ctx.subagents.finish(&run_id);
}

fn deliver(ctx: &Arc<AgentContext>, run_id: &str, parent_session_id: &str, text: &str, ok: bool) {
    let mut body = text.to_string();
    if body.chars().count() > RESULT_DELIVERY_MAX_CHARS {
        body = body.chars().take(RESULT_DELIVERY_MAX_CHARS).collect();
        body.push('…');
    }
    let message = if ok {
        format!("Background task finished:\n{body}")
    } else {
        body
    };
    if !ctx.conversations.deliver(&message, parent_session_id) {
        warn!(run_id, "no delivery callback registered; sub-agent result dropped");
    }
}
