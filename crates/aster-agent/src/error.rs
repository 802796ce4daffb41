use thiserror::Error;

use aster_provider::ProviderError;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("store error: {0}")]
    Store(#[from] aster_store::StoreError),

    #[error("memory error: {0}")]
    Memory(#[from] aster_memory::MemoryError),

    #[error("scheduler error: {0}")]
    Scheduler(#[from] aster_scheduler::SchedulerError),

    #[error("turn cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    /// Render the user-visible recovery message. Raw errors never reach the
    /// channel layer; the session stays valid in every case.
    pub fn user_message(&self) -> String {
        match self {
            AgentError::Provider(ProviderError::RateLimit { .. }) => {
                "I'm being rate limited right now — give me a moment and try again.".to_string()
            }
            AgentError::Provider(ProviderError::Auth(_)) => {
                "My model credentials were rejected. Please refresh them and try again."
                    .to_string()
            }
            AgentError::Provider(ProviderError::BadRequest(_)) => {
                "The conversation seems malformed. /clear will start a fresh session."
                    .to_string()
            }
            AgentError::Provider(ProviderError::EmptyResponse) => {
                "I got an empty response from the model — please try again.".to_string()
            }
            AgentError::Provider(ProviderError::Timeout) => {
                "The model took too long to answer. Please try again.".to_string()
            }
            AgentError::Provider(ProviderError::Unavailable(_)) => {
                "The model service is unavailable right now. Please try again shortly."
                    .to_string()
            }
            AgentError::Provider(ProviderError::UnsupportedCapability(cap)) => {
                format!("The active model does not support {cap}.")
            }
            AgentError::Store(aster_store::StoreError::PoolExhausted) => {
                "I'm busy with too many things at once — please try again.".to_string()
            }
            AgentError::Cancelled => "Okay, cancelled.".to_string(),
            _ => "Something went wrong on my side. Please try again.".to_string(),
        }
    }
}
