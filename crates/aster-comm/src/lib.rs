//! Channel-agnostic communication pipeline.
//!
//! Inbound: build an [`InboundContext`] per message and render the
//! trust-bounded user prefix. Outbound: strip leaked paths and narration,
//! peel `MEDIA:` directives, parse reply/react tags, split to platform
//! limits, and (optionally) convert markdown to a safe HTML subset.
//! Anything that must happen regardless of the model lives here as code,
//! not in the system prompt.

pub mod channel;
pub mod format;
pub mod inbound;
pub mod outbound;
pub mod split;
pub mod tags;

pub use channel::{ChannelAdapter, ChannelError, DeliveryCallback, OutboundMessage, StatusCallback};
pub use format::{markdown_to_html, strip_tags};
pub use inbound::{build_user_context_prefix, InboundContext};
pub use outbound::process_outbound;
pub use split::split_message;
pub use tags::{parse_react_tags, parse_reply_tag};
