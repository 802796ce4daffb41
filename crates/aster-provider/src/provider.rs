use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{ProviderError, Result};
use crate::types::{ChatRequest, EmbedResponse, StreamEvent};

/// Common interface for all LLM backends.
///
/// `chat_stream` pushes [`StreamEvent`]s through the channel and returns
/// once the turn is complete (after `Done`) or fails with a typed error.
/// Implementations without one of the two capabilities return
/// `UnsupportedCapability`.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name for logging and error messages.
    fn name(&self) -> &str;

    /// Stream one chat turn into `tx`.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<()>;

    /// Embed a batch of texts. Chat-only providers keep the default.
    async fn embed(&self, _texts: &[String]) -> Result<EmbedResponse> {
        Err(ProviderError::UnsupportedCapability("embeddings"))
    }

    /// Embedding dimension, when the embed capability exists.
    fn embedding_dim(&self) -> Option<usize> {
        None
    }

    /// Probe the embedding path with a known string.
    async fn test_embedding(&self) -> Result<()> {
        let resp = self.embed(&["aster embedding probe".to_string()]).await?;
        if resp.vectors.is_empty() || resp.dim == 0 {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(())
    }
}
