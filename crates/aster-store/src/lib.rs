//! Typed access to the agent's SQLite store.
//!
//! One database, one pool. Every subsystem — config registry, users, groups,
//! sessions, memory, abilities, scheduled tasks, sub-agent runs — goes
//! through [`Store`]. Schema creation is idempotent and safe to run on every
//! startup.

pub mod error;
pub mod pool;
pub mod schema;
pub mod types;
pub mod vector;

mod abilities;
mod config;
mod groups;
mod identity;
mod memories;
mod runs;
mod sessions;
mod store;
mod tasks;
mod users;

pub use config::CREDENTIAL_PREFIX;
pub use error::{Result, StoreError};
pub use memories::MemoryFilter;
pub use store::Store;
