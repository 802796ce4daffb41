//! Session compaction — replace a transcript prefix with one summary row.
//!
//! Keeps the last `TAIL_KEEP` messages verbatim and asks the chat model for
//! a single-paragraph summary of everything older. The swap is one store
//! transaction; the conversation cache is dropped afterwards so the next
//! turn re-reads.

use std::sync::Arc;

use tracing::{info, warn};

use aster_provider::{ChatMessage, ChatParams, ChatRequest, MessageRole};
use aster_store::types::{Role, Session};

use crate::agent::AgentContext;
use crate::context;
use crate::conversation::collect_text;
use crate::error::Result;

/// Messages kept verbatim at the end of the session.
const TAIL_KEEP: usize = 25;
/// Hard cap on the stored summary.
const SUMMARY_MAX_CHARS: usize = 2000;

const SUMMARY_SYSTEM_PROMPT: &str = "\
You compress conversation history for a personal assistant. Summarise the \
transcript into ONE paragraph that preserves: facts the user stated about \
themselves or the world, tasks that are still pending, tool results that \
later turns may rely on, and the user's preferred language and tone. Omit \
pleasantries and dead ends. Output only the paragraph, no heading, at most \
1800 characters.";

/// Compact the session when the context manager reports it heavy.
/// Returns true when a compaction ran.
pub async fn compact_if_needed(ctx: &Arc<AgentContext>, session: &Session) -> Result<bool> {
    let messages = ctx.store.list_messages(&session.id).await?;
    let limits = context::load_limits(&ctx.store).await?;
    let model = ctx.active_model().await;

    if !context::is_heavy(&messages, &model, &limits) {
        return Ok(false);
    }

    // Prefix = everything except the tail, system rows excluded.
    let non_system: Vec<_> = messages.iter().filter(|m| m.role != Role::System).collect();
    if non_system.len() <= TAIL_KEEP {
        return Ok(false);
    }
    let prefix = &non_system[..non_system.len() - TAIL_KEEP];

    let transcript: String = prefix
        .iter()
        .map(|m| format!("{}: {}", m.role.to_string().to_uppercase(), m.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    let req = ChatRequest {
        model: model.model_id.clone(),
        system: SUMMARY_SYSTEM_PROMPT.to_string(),
        messages: vec![ChatMessage::text(
            MessageRole::User,
            format!("Summarise this conversation history:\n\n{transcript}"),
        )],
        tools: Vec::new(),
        params: ChatParams {
            temperature: 0.0,
            max_tokens: Some(1024),
            thinking_budget: None,
            ..ChatParams::default()
        },
    };

    let mut summary = collect_text(ctx.chat_provider().await, &req).await?;
    summary = summary.trim().to_string();
    if summary.is_empty() {
        warn!(session = %session.id, "summary came back empty; skipping compaction");
        return Ok(false);
    }
    if summary.len() > SUMMARY_MAX_CHARS {
        let mut cut = SUMMARY_MAX_CHARS;
        while !summary.is_char_boundary(cut) {
            cut -= 1;
        }
        summary.truncate(cut);
    }

    let prefix_ids: Vec<i64> = prefix.iter().map(|m| m.id).collect();
    ctx.store
        .replace_with_summary(&session.id, &prefix_ids, &summary)
        .await?;
    ctx.conversations.drop_cache(&session.id);

    info!(
        session = %session.id,
        compacted = prefix_ids.len(),
        kept = TAIL_KEEP,
        "session compacted"
    );
    ctx.conversations.notify_status(
        &session.id,
        &format!(
            "Condensed {} older messages into a summary to stay within the model's context.",
            prefix_ids.len()
        ),
    );
    Ok(true)
}
