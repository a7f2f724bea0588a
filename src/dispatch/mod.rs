//! Worker-side dispatch protocol
//!
//! Turns "ask the coordinator for the next module" into an awaitable
//! request/response exchange with timeout detection and retry.

mod iterator;

pub use iterator::{
    AsyncModuleIterator, DispatchError, DispatchOptions, DEFAULT_ASYNC_TIMEOUT, RETRY_LIMIT,
    RETRY_TIMEOUT_INCREMENT,
};
