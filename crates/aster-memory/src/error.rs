use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("store error: {0}")]
    Store(#[from] aster_store::StoreError),

    #[error("provider error: {0}")]
    Provider(#[from] aster_provider::ProviderError),

    #[error("embedding dimension mismatch: stored {stored}, active {active}")]
    DimensionMismatch { stored: usize, active: usize },
}

pub type Result<T> = std::result::Result<T, MemoryError>;
