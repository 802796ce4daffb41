//! Durable time-triggered task execution.
//!
//! One polling loop per process. Each due task re-enters the conversation
//! loop through the registered callback, as if `created_by` had sent the
//! payload. Semantics are at-least-once: a crash mid-callback means the row
//! is still due on restart.

pub mod engine;
pub mod error;
pub mod schedule;

pub use engine::{create_task, Scheduler, TaskCallback};
pub use error::{Result, SchedulerError};
pub use schedule::compute_next_run;

/// Reserved payload of the system update-check task. This string is the
/// scheduler's only public wire contract — existing task rows depend on it.
pub const UPDATE_CHECK_PAYLOAD: &str = "__syne_update_check__";
