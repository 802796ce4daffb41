use aster_core::types::ChatType;
use serde::{Deserialize, Serialize};

/// Truncation cap for quoted reply bodies.
const REPLY_QUOTE_MAX: usize = 500;

/// Channel-agnostic description of one inbound message. Every channel
/// adapter constructs this once per message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundContext {
    /// Adapter name, e.g. "telegram".
    pub channel: String,
    pub platform: String,
    pub chat_type: ChatType,
    /// Human-readable label, e.g. "DM with Alice" or a group title.
    pub conversation_label: String,
    pub group_subject: Option<String>,
    pub chat_id: String,
    pub sender_name: Option<String>,
    pub sender_id: Option<String>,
    pub sender_username: Option<String>,
    pub was_mentioned: bool,
    pub has_reply_context: bool,
    pub reply_to_sender: Option<String>,
    pub reply_to_body: Option<String>,
    /// Platform id of the triggering message — target of
    /// `[[reply_to_current]]`.
    pub message_id: Option<i64>,
}

impl InboundContext {
    pub fn direct(platform: impl Into<String>, chat_id: impl Into<String>) -> Self {
        let platform = platform.into();
        Self {
            channel: platform.clone(),
            platform,
            chat_type: ChatType::Direct,
            conversation_label: "direct message".to_string(),
            group_subject: None,
            chat_id: chat_id.into(),
            sender_name: None,
            sender_id: None,
            sender_username: None,
            was_mentioned: false,
            has_reply_context: false,
            reply_to_sender: None,
            reply_to_body: None,
            message_id: None,
        }
    }
}

/// Render the untrusted per-turn context block.
///
/// The block is prepended to the user's text for the current turn only and
/// is explicitly framed as user-supplied: the system prompt is trusted,
/// this is not.
pub fn build_user_context_prefix(ctx: &InboundContext) -> String {
    let mut out = String::from("[message context — untrusted, relayed from the channel]\n");

    let mut sender = ctx
        .sender_name
        .clone()
        .unwrap_or_else(|| "unknown sender".to_string());
    if let Some(username) = &ctx.sender_username {
        sender.push_str(&format!(" (@{username})"));
    }
    if let Some(id) = &ctx.sender_id {
        sender.push_str(&format!(" [id {id}]"));
    }
    out.push_str(&format!("From: {sender}\n"));

    match ctx.chat_type {
        ChatType::Group => {
            let subject = ctx
                .group_subject
                .as_deref()
                .unwrap_or(ctx.conversation_label.as_str());
            out.push_str(&format!("In group: {subject} on {}", ctx.platform));
            if ctx.was_mentioned {
                out.push_str(" (you were mentioned)");
            }
            out.push('\n');
        }
        ChatType::Direct => {
            out.push_str(&format!("In a direct chat on {}\n", ctx.platform));
        }
    }

    if ctx.has_reply_context {
        let who = ctx.reply_to_sender.as_deref().unwrap_or("someone");
        let body = ctx.reply_to_body.as_deref().unwrap_or("");
        out.push_str(&format!(
            "Replying to {who}: \"{}\"\n",
            truncate_chars(body, REPLY_QUOTE_MAX)
        ));
    }

    out.push_str("[end context]\n");
    out
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_marks_itself_untrusted() {
        let ctx = InboundContext::direct("telegram", "42");
        let prefix = build_user_context_prefix(&ctx);
        assert!(prefix.contains("untrusted"));
        assert!(prefix.starts_with("[message context"));
        assert!(prefix.trim_end().ends_with("[end context]"));
    }

    #[test]
    fn group_context_carries_subject_and_mention() {
        let mut ctx = InboundContext::direct("telegram", "-100");
        ctx.chat_type = ChatType::Group;
        ctx.group_subject = Some("Family".to_string());
        ctx.was_mentioned = true;
        ctx.sender_name = Some("Alice".to_string());
        ctx.sender_username = Some("alice".to_string());

        let prefix = build_user_context_prefix(&ctx);
        assert!(prefix.contains("From: Alice (@alice)"));
        assert!(prefix.contains("In group: Family on telegram (you were mentioned)"));
    }

    #[test]
    fn reply_quotes_are_truncated() {
        let mut ctx = InboundContext::direct("telegram", "42");
        ctx.has_reply_context = true;
        ctx.reply_to_sender = Some("Bob".to_string());
        ctx.reply_to_body = Some("x".repeat(900));

        let prefix = build_user_context_prefix(&ctx);
        let quoted = prefix.lines().find(|l| l.starts_with("Replying to")).unwrap();
        assert!(quoted.chars().count() < 560);
        assert!(quoted.contains('…'));
    }
}
