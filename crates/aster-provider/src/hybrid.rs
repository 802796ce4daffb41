//! Hybrid provider — chat from one backend, embeddings from another.
//!
//! Covers the common deployment where the chat vendor's credentials cannot
//! reach an embedding endpoint, so a second (cheap) vendor supplies vectors.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::provider::Provider;
use crate::types::{ChatRequest, EmbedResponse, StreamEvent};

pub struct HybridProvider {
    name: String,
    chat: Arc<dyn Provider>,
    embed: Arc<dyn Provider>,
}

impl HybridProvider {
    pub fn new(chat: Arc<dyn Provider>, embed: Arc<dyn Provider>) -> Self {
        let name = format!("{}+{}", chat.name(), embed.name());
        Self { name, chat, embed }
    }
}

#[async_trait]
impl Provider for HybridProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()> {
        self.chat.chat_stream(req, tx).await
    }

    async fn embed(&self, texts: &[String]) -> Result<EmbedResponse> {
        self.embed.embed(texts).await
    }

    fn embedding_dim(&self) -> Option<usize> {
        self.embed.embedding_dim()
    }
}
