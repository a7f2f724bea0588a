//! Named-event channel between the coordinator and its workers
//!
//! [`EventBus`] is a thin wrapper around [`tokio::sync::broadcast`] carrying
//! named events with JSON payloads. Publishing never blocks; subscribers
//! receive clones of each event in publish order. Dropping a subscription
//! is the `off` operation — once a receiver is gone, no further events are
//! delivered to it.
//!
//! The payload DTOs below define the wire shapes exchanged over the bus.
//! Payloads that fail to deserialize are the receiver's problem to log and
//! ignore; the bus itself is untyped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::models::WorkerId;

/// Request for the next module; payload is [`NextModuleRequest`].
pub const EVENT_NEXT_MODULE_REQUEST: &str = "next-module-request";
/// Reply to a next-module request; payload is [`NextModuleResponse`].
pub const EVENT_NEXT_MODULE_RESPONSE: &str = "next-module-response";
/// One module finished on a worker; payload is [`ModuleResult`].
pub const EVENT_MODULE_RESULT: &str = "module-result";
/// A worker drained its queue and stopped; payload is [`WorkerComplete`].
pub const EVENT_WORKER_COMPLETE: &str = "worker-complete";

/// A named event with an arbitrary JSON payload.
#[derive(Clone, Debug)]
pub struct Event {
    pub name: Arc<str>,
    pub payload: Value,
}

impl Event {
    pub fn new(name: &str, payload: Value) -> Self {
        Self {
            name: Arc::from(name),
            payload,
        }
    }

    /// Whether this event carries the given name.
    pub fn is(&self, name: &str) -> bool {
        &*self.name == name
    }
}

/// Broadcast channel for coordination events.
///
/// Cheap to clone; all clones publish into the same ring buffer. Slow
/// receivers observe `RecvError::Lagged` and skip the oldest entries, which
/// the dispatch protocol tolerates by design.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new bus with the given channel capacity (clamped to >= 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes a named event to all active subscribers.
    ///
    /// If there are no receivers the event is dropped; emit never blocks.
    pub fn emit(&self, name: &str, payload: Value) {
        let _ = self.tx.send(Event::new(name, payload));
    }

    /// Serializes `payload` and emits it under `name`.
    pub fn emit_json<T: Serialize>(&self, name: &str, payload: &T) {
        match serde_json::to_value(payload) {
            Ok(value) => self.emit(name, value),
            Err(e) => tracing::error!("failed to serialize `{name}` payload: {e}"),
        }
    }

    /// Creates a new receiver observing events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        // Enough slack that a full queue of responses never laps a worker.
        Self::new(1024)
    }
}

/// Payload of [`EVENT_NEXT_MODULE_REQUEST`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NextModuleRequest {
    pub browser: WorkerId,
}

/// Payload of [`EVENT_NEXT_MODULE_RESPONSE`].
///
/// `done = true` is the terminal signal: the addressed worker's queue is
/// exhausted and no further requests will be answered.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NextModuleResponse {
    pub browser: WorkerId,
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Payload of [`EVENT_MODULE_RESULT`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleResult {
    pub browser: WorkerId,
    pub module: String,
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Payload of [`EVENT_WORKER_COMPLETE`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerComplete {
    pub browser: WorkerId,
    pub failed: bool,
}
