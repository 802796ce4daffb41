//! The contract every channel adapter implements, and the callback types
//! channels register with the core.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("channel '{channel}' failed: {reason}")]
    Failed { channel: String, reason: String },

    #[error("channel is not connected")]
    NotConnected,
}

/// A fully processed reply ready for delivery.
#[derive(Debug, Clone, Default)]
pub struct OutboundMessage {
    pub text: String,
    /// Platform message id to reply to, from the reply tags.
    pub reply_to: Option<i64>,
    /// Reactions to attach to the triggering message.
    pub reactions: Vec<String>,
    /// File peeled off a `MEDIA:` directive; the text becomes its caption.
    pub media_path: Option<String>,
}

/// Forwards a sub-agent result to the chat that spawned it:
/// `(message, parent_session_id)`.
pub type DeliveryCallback = Arc<dyn Fn(String, String) + Send + Sync>;

/// Best-effort status notification (compaction, long operations):
/// `(session_id, message)`.
pub type StatusCallback = Arc<dyn Fn(String, String) + Send + Sync>;

/// Implemented by every transport (Telegram, terminal, …). The adapter owns
/// its connection, builds an `InboundContext` per message, calls into the
/// agent, and applies the outbound pipeline before sending.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Stable lowercase identifier, e.g. "telegram".
    fn name(&self) -> &str;

    async fn start(&self) -> Result<(), ChannelError>;

    async fn stop(&self) -> Result<(), ChannelError>;

    /// Deliver one message to a chat on this channel.
    async fn send(&self, chat_id: &str, message: &OutboundMessage) -> Result<(), ChannelError>;
}
