//! Context budget accounting — decides when a session must be compacted.

use aster_provider::ModelEntry;
use aster_store::types::MessageRow;
use aster_store::Store;

use crate::error::Result;

/// Flat per-message token overhead for role/markup framing.
const ROLE_OVERHEAD_TOKENS: u32 = 4;
/// Heuristic characters-per-token divisor.
const CHARS_PER_TOKEN: f64 = 3.5;
/// A session is heavy once the estimate reaches this share of the budget.
const HEAVY_FRACTION: f64 = 0.90;

pub const DEFAULT_MAX_MESSAGES: i64 = 100;
pub const DEFAULT_COMPACTION_THRESHOLD_CHARS: i64 = 150_000;

/// Session limits read from config each turn.
#[derive(Debug, Clone, Copy)]
pub struct ContextLimits {
    pub max_messages: i64,
    pub compaction_threshold_chars: i64,
}

pub async fn load_limits(store: &Store) -> Result<ContextLimits> {
    let max_messages = store
        .get_config("session.max_messages", serde_json::json!(DEFAULT_MAX_MESSAGES))
        .await?
        .as_i64()
        .unwrap_or(DEFAULT_MAX_MESSAGES);
    let compaction_threshold_chars = store
        .get_config(
            "session.compaction_threshold",
            serde_json::json!(DEFAULT_COMPACTION_THRESHOLD_CHARS),
        )
        .await?
        .as_i64()
        .unwrap_or(DEFAULT_COMPACTION_THRESHOLD_CHARS);
    Ok(ContextLimits {
        max_messages,
        compaction_threshold_chars,
    })
}

/// Character-based token estimate. The model's own `UsageUpdate` numbers are
/// preferred when available; this heuristic covers everything else.
pub fn estimate_tokens(messages: &[MessageRow]) -> u32 {
    messages
        .iter()
        .map(|m| (m.content.len() as f64 / CHARS_PER_TOKEN).ceil() as u32 + ROLE_OVERHEAD_TOKENS)
        .sum()
}

pub fn total_chars(messages: &[MessageRow]) -> i64 {
    messages.iter().map(|m| m.content.len() as i64).sum()
}

/// Whether the session needs compaction before the next model call.
pub fn is_heavy(messages: &[MessageRow], model: &ModelEntry, limits: &ContextLimits) -> bool {
    let estimated = estimate_tokens(messages) as f64;
    let budget = model.usable_budget() as f64;
    if budget > 0.0 && estimated >= budget * HEAVY_FRACTION {
        return true;
    }
    if messages.len() as i64 >= limits.max_messages {
        return true;
    }
    total_chars(messages) >= limits.compaction_threshold_chars
}

#[cfg(test)]
mod tests {
    use super::*;
    use aster_store::types::Role;

    fn msg(content: &str) -> MessageRow {
        MessageRow {
            id: 0,
            session_id: "s".to_string(),
            role: Role::User,
            content: content.to_string(),
            tool_call_id: None,
            tool_name: None,
            tool_args: None,
            metadata: serde_json::json!({}),
            created_at: String::new(),
        }
    }

    fn model(context_window: u32, reserved: u32) -> ModelEntry {
        ModelEntry {
            key: "m".into(),
            label: String::new(),
            driver: "openai".into(),
            model_id: "gpt".into(),
            context_window,
            reserved_output_tokens: reserved,
            params: None,
            reasoning_visible: false,
            credential_key: None,
            base_url: None,
        }
    }

    #[test]
    fn estimate_matches_heuristic() {
        // 35 chars / 3.5 = 10 tokens + 4 overhead.
        let msgs = vec![msg(&"x".repeat(35))];
        assert_eq!(estimate_tokens(&msgs), 14);
        // ceil rounds partial tokens up.
        let msgs = vec![msg("ab")];
        assert_eq!(estimate_tokens(&msgs), 5);
    }

    #[test]
    fn heavy_on_token_budget() {
        let limits = ContextLimits {
            max_messages: 1_000,
            compaction_threshold_chars: 10_000_000,
        };
        // Budget 100 tokens; 90% = 90. One message of 315 chars ≈ 94 tokens.
        let m = model(150, 50);
        assert!(is_heavy(&[msg(&"x".repeat(315))], &m, &limits));
        assert!(!is_heavy(&[msg("short")], &m, &limits));
    }

    #[test]
    fn heavy_on_message_count() {
        let limits = ContextLimits {
            max_messages: 3,
            compaction_threshold_chars: 10_000_000,
        };
        let m = model(1_000_000, 0);
        let msgs: Vec<_> = (0..3).map(|_| msg("hi")).collect();
        assert!(is_heavy(&msgs, &m, &limits));
        assert!(!is_heavy(&msgs[..2], &m, &limits));
    }

    #[test]
    fn heavy_on_char_threshold() {
        let limits = ContextLimits {
            max_messages: 1_000,
            compaction_threshold_chars: 100,
        };
        let m = model(1_000_000, 0);
        assert!(is_heavy(&[msg(&"y".repeat(120))], &m, &limits));
    }
}
