//! Execution state tracking
//!
//! The authoritative source of "what work is left, for whom": module
//! queues, per-worker dispatch history, failure attribution, and the
//! persisted execution record used for replay and bisection.

mod manager;
mod record;

pub use manager::{ExecutionState, QueueMode, StateError};
pub use record::{ExecutionRecord, RECORD_FILE_PREFIX};
