//! Asynchronous next-module iterator
//!
//! One instance per worker. Each call to [`AsyncModuleIterator::next`] emits
//! a request event and suspends until the matching response event arrives or
//! the timeout fires. Timeouts retry the request up to [`RETRY_LIMIT`]
//! times, each attempt with a strictly larger timeout; retries are invisible
//! to the caller except for latency. The terminal `done` response detaches
//! the iterator from the channel for good.
//!
//! Exactly one exchange can be in flight per worker: `next()` takes
//! `&mut self`, so a second request cannot be issued while one is pending.
//! The retry counter and the current timeout are fields of this value, not
//! globals, so repeated runs in one process never interfere.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::channel::{
    Event, EventBus, NextModuleRequest, NextModuleResponse, EVENT_NEXT_MODULE_REQUEST,
    EVENT_NEXT_MODULE_RESPONSE,
};
use crate::models::WorkerId;

/// How many timed-out requests are re-issued before giving up.
pub const RETRY_LIMIT: u32 = 3;

/// How much longer each retry waits than the attempt before it.
pub const RETRY_TIMEOUT_INCREMENT: Duration = Duration::from_secs(2);

/// Default per-attempt response timeout.
pub const DEFAULT_ASYNC_TIMEOUT: Duration = Duration::from_secs(5);

/// Dispatch protocol errors
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("timed out after {timeout_secs} s while waiting for response for `{event}`")]
    Timeout { event: String, timeout_secs: u64 },

    #[error("event channel closed while waiting for response for `{event}`")]
    ChannelClosed { event: String },
}

/// Configuration for one iterator instance.
#[derive(Clone, Debug)]
pub struct DispatchOptions {
    pub request_event: String,
    pub response_event: String,
    pub timeout: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            request_event: EVENT_NEXT_MODULE_REQUEST.to_string(),
            response_event: EVENT_NEXT_MODULE_RESPONSE.to_string(),
            timeout: DEFAULT_ASYNC_TIMEOUT,
        }
    }
}

/// Per-worker async iterator over dispatched modules.
pub struct AsyncModuleIterator {
    bus: EventBus,
    rx: Option<broadcast::Receiver<Event>>,
    request_event: Arc<str>,
    response_event: Arc<str>,
    worker: WorkerId,
    timeout: Duration,
    retries: u32,
    done: bool,
}

impl AsyncModuleIterator {
    /// Creates an iterator and subscribes it to the response channel.
    pub fn new(bus: &EventBus, worker: impl Into<WorkerId>, options: DispatchOptions) -> Self {
        Self {
            bus: bus.clone(),
            rx: Some(bus.subscribe()),
            request_event: Arc::from(options.request_event.as_str()),
            response_event: Arc::from(options.response_event.as_str()),
            worker: worker.into(),
            timeout: options.timeout,
            retries: 0,
            done: false,
        }
    }

    /// Whether the terminal `done` response has been observed.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Requests the next module.
    ///
    /// Resolves to `Ok(Some(module))`, or `Ok(None)` once the queue is
    /// exhausted (and immediately on every call after that). A timeout that
    /// survives all retries resolves to [`DispatchError::Timeout`]; the
    /// iterator stays usable for further calls.
    pub async fn next(&mut self) -> Result<Option<String>, DispatchError> {
        if self.done {
            return Ok(None);
        }

        let mut rx = match self.rx.take() {
            Some(rx) => rx,
            None => {
                self.done = true;
                return Ok(None);
            }
        };

        let result = self.exchange(&mut rx).await;

        // The terminal response detaches the handler; everything else keeps
        // the subscription for the next exchange.
        if !self.done {
            self.rx = Some(rx);
        }
        result
    }

    async fn exchange(
        &mut self,
        rx: &mut broadcast::Receiver<Event>,
    ) -> Result<Option<String>, DispatchError> {
        self.discard_stale(rx)?;
        self.send_request();

        let mut deadline = Instant::now() + self.timeout;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Ok(event) => match self.accept(event) {
                        Some(resolved) => return Ok(resolved),
                        None => continue,
                    },
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(
                            "worker {} lagged behind the event channel, skipped {skipped} events",
                            self.worker
                        );
                    }
                    Err(RecvError::Closed) => {
                        return Err(DispatchError::ChannelClosed {
                            event: self.response_event.to_string(),
                        });
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    self.retries += 1;
                    self.timeout += RETRY_TIMEOUT_INCREMENT;

                    if self.retries > RETRY_LIMIT {
                        return Err(DispatchError::Timeout {
                            event: self.request_event.to_string(),
                            timeout_secs: self.timeout.as_secs(),
                        });
                    }

                    warn!(
                        "timed out after {} s while waiting for response for `{}`; \
                         retrying ({}/{})",
                        self.timeout.as_secs(),
                        self.request_event,
                        self.retries,
                        RETRY_LIMIT
                    );
                    self.send_request();
                    deadline = Instant::now() + self.timeout;
                }
            }
        }
    }

    /// Returns the resolved value if `event` answers the pending request.
    ///
    /// Anything else — other event names, other workers' responses, payloads
    /// that do not parse — is logged and ignored, tolerating duplicate and
    /// spurious events from the channel.
    fn accept(&mut self, event: Event) -> Option<Option<String>> {
        if !event.is(&self.response_event) {
            return None;
        }

        let response: NextModuleResponse = match serde_json::from_value(event.payload) {
            Ok(response) => response,
            Err(e) => {
                debug!("ignoring malformed `{}` payload: {e}", self.response_event);
                return None;
            }
        };

        if response.browser != self.worker {
            return None;
        }

        if response.done {
            self.done = true;
            return Some(None);
        }

        match response.value {
            Some(module) => Some(Some(module)),
            None => {
                debug!(
                    "ignoring `{}` response without a value for worker {}",
                    self.response_event, self.worker
                );
                None
            }
        }
    }

    /// Drops responses buffered from abandoned exchanges.
    ///
    /// A retried request can produce a duplicate response after the original
    /// one already resolved; consuming it as the answer to the *next*
    /// request would hand the worker a module out of order.
    fn discard_stale(&self, rx: &mut broadcast::Receiver<Event>) -> Result<(), DispatchError> {
        loop {
            match rx.try_recv() {
                Ok(event) => {
                    if event.is(&self.response_event) {
                        debug!(
                            "discarding `{}` response with no pending request for worker {}",
                            self.response_event, self.worker
                        );
                    }
                }
                Err(TryRecvError::Empty) => return Ok(()),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(
                        "worker {} lagged behind the event channel, skipped {skipped} events",
                        self.worker
                    );
                }
                Err(TryRecvError::Closed) => {
                    return Err(DispatchError::ChannelClosed {
                        event: self.response_event.to_string(),
                    });
                }
            }
        }
    }

    fn send_request(&self) {
        self.bus.emit_json(
            &self.request_event,
            &NextModuleRequest {
                browser: self.worker.clone(),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EVENT_NEXT_MODULE_RESPONSE as RESPONSE;
    use tokio_test::assert_ok;

    fn respond(bus: &EventBus, browser: &str, done: bool, value: Option<&str>) {
        bus.emit_json(
            RESPONSE,
            &NextModuleResponse {
                browser: browser.to_string(),
                done,
                value: value.map(str::to_string),
            },
        );
    }

    /// Replies to request number `answer_on` (1-based) with `module`.
    fn spawn_responder(bus: &EventBus, answer_on: u32, module: &str) {
        let bus = bus.clone();
        let module = module.to_string();
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            let mut seen = 0;
            while let Ok(event) = rx.recv().await {
                if !event.is(EVENT_NEXT_MODULE_REQUEST) {
                    continue;
                }
                let request: NextModuleRequest = serde_json::from_value(event.payload).unwrap();
                seen += 1;
                if seen == answer_on {
                    respond(&bus, &request.browser, false, Some(&module));
                    break;
                }
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_with_first_response() {
        let bus = EventBus::new(64);
        spawn_responder(&bus, 1, "tests/unit/a");

        let mut iter = AsyncModuleIterator::new(&bus, "1", DispatchOptions::default());
        let module = tokio_test::assert_ok!(iter.next().await);
        assert_eq!(module.as_deref(), Some("tests/unit/a"));
        assert_eq!(iter.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_rejection() {
        let bus = EventBus::new(64);
        let mut requests = bus.subscribe();

        let mut iter = AsyncModuleIterator::new(&bus, "1", DispatchOptions::default());
        let err = iter.next().await.unwrap_err();

        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert!(err.to_string().contains("next-module-request"));

        // One initial request plus exactly RETRY_LIMIT re-issues.
        let mut emitted = 0;
        while let Ok(event) = requests.try_recv() {
            if event.is(EVENT_NEXT_MODULE_REQUEST) {
                emitted += 1;
            }
        }
        assert_eq!(emitted, 1 + RETRY_LIMIT);

        // Every attempt waited strictly longer than the one before it:
        // 5 s, 7 s, 9 s, 11 s, leaving the budget at 13 s after rejection.
        assert_eq!(iter.retries, RETRY_LIMIT + 1);
        assert_eq!(iter.timeout, Duration::from_secs(13));

        // Exhaustion is not terminal; the iterator can issue new requests.
        assert!(!iter.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_on_second_attempt() {
        let bus = EventBus::new(64);
        spawn_responder(&bus, 2, "tests/unit/b");

        let mut iter = AsyncModuleIterator::new(&bus, "1", DispatchOptions::default());
        let module = iter.next().await.unwrap();

        assert_eq!(module.as_deref(), Some("tests/unit/b"));
        assert_eq!(iter.retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_detaches_iterator() {
        let bus = EventBus::new(64);
        {
            let bus = bus.clone();
            let mut rx = bus.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    if event.is(EVENT_NEXT_MODULE_REQUEST) {
                        respond(&bus, "1", true, None);
                        break;
                    }
                }
            });
        }

        let mut iter = AsyncModuleIterator::new(&bus, "1", DispatchOptions::default());
        assert_eq!(iter.next().await.unwrap(), None);
        assert!(iter.is_done());

        // Later calls resolve immediately without touching the channel.
        let mut requests = bus.subscribe();
        assert_eq!(iter.next().await.unwrap(), None);
        assert!(matches!(requests.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_response_is_discarded() {
        let bus = EventBus::new(64);

        let mut iter = AsyncModuleIterator::new(&bus, "1", DispatchOptions::default());
        // A response nobody asked for, buffered before the first request.
        respond(&bus, "1", false, Some("stale"));

        spawn_responder(&bus, 1, "fresh");
        let module = iter.next().await.unwrap();
        assert_eq!(module.as_deref(), Some("fresh"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_workers_responses_are_ignored() {
        let bus = EventBus::new(64);
        {
            let bus = bus.clone();
            let mut rx = bus.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    if event.is(EVENT_NEXT_MODULE_REQUEST) {
                        respond(&bus, "2", false, Some("other"));
                        respond(&bus, "1", false, Some("mine"));
                        break;
                    }
                }
            });
        }

        let mut iter = AsyncModuleIterator::new(&bus, "1", DispatchOptions::default());
        let module = iter.next().await.unwrap();
        assert_eq!(module.as_deref(), Some("mine"));
    }
}
