//! Uniform chat + embedding interface over heterogeneous LLM backends.
//!
//! One trait, two capabilities. A provider that lacks one fails with
//! `UnsupportedCapability`; a hybrid provider composes a chat backend with a
//! different embedding backend. All transport-level failures are classified
//! into the typed error kinds before they reach the conversation loop.

pub mod anthropic;
pub mod error;
pub mod hybrid;
pub mod models;
pub mod openai;
pub mod provider;
pub mod sse;
pub mod types;

pub use error::{ProviderError, Result};
pub use hybrid::HybridProvider;
pub use models::{
    build_embedding_provider, build_provider, find_model, parse_embedding_list,
    parse_model_list, EmbeddingEntry, ModelEntry,
};
pub use provider::Provider;
pub use types::{
    ChatMessage, ChatParams, ChatRequest, EmbedResponse, ImagePart, MessageRole, StreamEvent,
    ToolCallStub, ToolSpec,
};
