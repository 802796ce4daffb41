//! Long-term, semantically searchable memory with safe writes.

pub mod engine;
pub mod error;

pub use engine::{DedupReport, MemoryEngine, Recalled, RecallQuery, StoreOutcome};
pub use error::{MemoryError, Result};
