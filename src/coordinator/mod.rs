//! Run coordination
//!
//! The controller-side event listener. It owns the execution state and
//! answers each worker's next-module request by popping from the queue the
//! run's mode selected, recording every dispatch as it happens. Module
//! results feed the failure record and timing history; worker completions
//! tell it when the run is over.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{
    Event, EventBus, ModuleResult, NextModuleRequest, NextModuleResponse, WorkerComplete,
    EVENT_MODULE_RESULT, EVENT_NEXT_MODULE_REQUEST, EVENT_NEXT_MODULE_RESPONSE,
    EVENT_WORKER_COMPLETE,
};
use crate::models::WorkerId;
use crate::state::{ExecutionRecord, ExecutionState, QueueMode, StateError};

/// What the coordinator knows once every worker has completed.
#[derive(Clone, Debug)]
pub struct CoordinatorReport {
    /// The persistable record of this run.
    pub record: ExecutionRecord,
    /// Failed worker → attributed failing module.
    pub failure_report: BTreeMap<WorkerId, String>,
    /// Observed (module, duration) pairs for the timing history.
    pub module_timings: Vec<(String, u64)>,
    /// Whether any worker reported a failing module.
    pub any_failed: bool,
}

/// Event listener servicing dispatch requests for one run.
pub struct Coordinator {
    bus: EventBus,
    rx: broadcast::Receiver<Event>,
    state: Arc<ExecutionState>,
    expected_workers: usize,
    module_timings: Vec<(String, u64)>,
}

impl Coordinator {
    /// Creates a coordinator subscribed to the bus.
    ///
    /// Subscribe happens here, before any worker task starts, so no request
    /// can slip past the listener.
    pub fn new(bus: &EventBus, state: Arc<ExecutionState>, expected_workers: usize) -> Self {
        Self {
            rx: bus.subscribe(),
            bus: bus.clone(),
            state,
            expected_workers,
            module_timings: Vec::new(),
        }
    }

    /// Runs the listener on its own task.
    pub fn spawn(self) -> JoinHandle<Result<CoordinatorReport, StateError>> {
        tokio::spawn(self.listen())
    }

    async fn listen(mut self) -> Result<CoordinatorReport, StateError> {
        while self.state.completed_count() < self.expected_workers {
            match self.rx.recv().await {
                Ok(event) => self.handle(event)?,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("coordinator lagged behind the event channel, skipped {skipped} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        Ok(self.finalize())
    }

    fn handle(&mut self, event: Event) -> Result<(), StateError> {
        if event.is(EVENT_NEXT_MODULE_REQUEST) {
            let Some(request) = parse::<NextModuleRequest>(&event) else {
                return Ok(());
            };
            self.dispatch_next(&request.browser);
        } else if event.is(EVENT_MODULE_RESULT) {
            let Some(result) = parse::<ModuleResult>(&event) else {
                return Ok(());
            };
            self.module_timings
                .push((result.module.clone(), result.duration_ms));
            if !result.passed {
                self.state.record_failure(&result.browser)?;
            }
        } else if event.is(EVENT_WORKER_COMPLETE) {
            if parse::<WorkerComplete>(&event).is_some() {
                self.state.increment_completed();
            }
        }
        Ok(())
    }

    /// Pops the next module for `worker` from whichever queue family this
    /// run uses and answers the request; an empty queue answers `done`.
    fn dispatch_next(&self, worker: &str) {
        let next = match self.state.mode() {
            Some(QueueMode::Shared) => self.state.pop_shared_queue(),
            Some(QueueMode::Replay) => self.state.pop_replay_queue(worker),
            None => None,
        };

        let response = match next {
            Some(module) => {
                self.state.record_dispatch(worker, &module);
                debug!("dispatching {module} to worker {worker}");
                NextModuleResponse {
                    browser: worker.to_string(),
                    done: false,
                    value: Some(module),
                }
            }
            None => {
                debug!("queue exhausted for worker {worker}");
                NextModuleResponse {
                    browser: worker.to_string(),
                    done: true,
                    value: None,
                }
            }
        };

        self.bus.emit_json(EVENT_NEXT_MODULE_RESPONSE, &response);
    }

    fn finalize(self) -> CoordinatorReport {
        let failure_report = self.state.failure_report();
        CoordinatorReport {
            record: self.state.build_record(self.expected_workers),
            any_failed: !failure_report.is_empty(),
            failure_report,
            module_timings: self.module_timings,
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(event: &Event) -> Option<T> {
    match serde_json::from_value(event.payload.clone()) {
        Ok(payload) => Some(payload),
        Err(e) => {
            debug!("ignoring malformed `{}` payload: {e}", event.name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::DryRunLoader;
    use crate::worker::{WorkerOptions, WorkerRunner};

    fn queue(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_load_balanced_run_drains_shared_queue() {
        let bus = EventBus::new(256);
        let state = Arc::new(ExecutionState::new());
        state
            .set_shared_queue(queue(&["m1", "m2", "m3", "m4"]))
            .unwrap();

        let coordinator = Coordinator::new(&bus, state.clone(), 2).spawn();

        let mut handles = Vec::new();
        for id in ["1", "2"] {
            let runner = WorkerRunner::new(
                &bus,
                id,
                Arc::new(DryRunLoader::new()),
                WorkerOptions::default(),
            );
            handles.push(tokio::spawn(runner.run_pulling()));
        }

        let mut dispatched = 0;
        for handle in handles {
            let run = handle.await.unwrap().unwrap();
            assert!(!run.abandoned);
            dispatched += run.summary.total;
        }
        // Every module dispatched exactly once across the two workers.
        assert_eq!(dispatched, 4);

        let report = coordinator.await.unwrap().unwrap();
        assert!(!report.any_failed);
        assert_eq!(report.record.number_of_browsers, 2);

        let recorded: usize = report
            .record
            .execution_mapping
            .values()
            .map(|modules| modules.len())
            .sum();
        assert_eq!(recorded, 4);
        assert_eq!(state.completed_count(), 2);
    }

    #[tokio::test]
    async fn test_replay_run_reproduces_each_workers_queue() {
        let bus = EventBus::new(256);
        let state = Arc::new(ExecutionState::new());
        state.set_replay_queue("1", queue(&["a1", "a2"])).unwrap();
        state.set_replay_queue("2", queue(&["b1"])).unwrap();

        let coordinator = Coordinator::new(&bus, state.clone(), 2).spawn();

        let mut handles = Vec::new();
        for id in ["1", "2"] {
            let runner = WorkerRunner::new(
                &bus,
                id,
                Arc::new(DryRunLoader::new()),
                WorkerOptions::default(),
            );
            handles.push(tokio::spawn(runner.run_pulling()));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let report = coordinator.await.unwrap().unwrap();
        assert_eq!(report.record.execution_mapping["1"], vec!["a1", "a2"]);
        assert_eq!(report.record.execution_mapping["2"], vec!["b1"]);
    }

    #[tokio::test]
    async fn test_failing_module_is_attributed_to_its_worker() {
        let bus = EventBus::new(256);
        let state = Arc::new(ExecutionState::new());
        state.set_shared_queue(queue(&["m1"])).unwrap();

        let coordinator = Coordinator::new(&bus, state.clone(), 1).spawn();

        // Drive the protocol by hand: pull the module, report it failed.
        let mut rx = bus.subscribe();
        bus.emit_json(
            EVENT_NEXT_MODULE_REQUEST,
            &NextModuleRequest {
                browser: "1".to_string(),
            },
        );
        let module = loop {
            let event = rx.recv().await.unwrap();
            if event.is(EVENT_NEXT_MODULE_RESPONSE) {
                let response: NextModuleResponse =
                    serde_json::from_value(event.payload).unwrap();
                break response.value.unwrap();
            }
        };

        bus.emit_json(
            EVENT_MODULE_RESULT,
            &ModuleResult {
                browser: "1".to_string(),
                module,
                passed: false,
                duration_ms: 12,
                error: Some("assertion failed".to_string()),
            },
        );
        bus.emit_json(
            EVENT_WORKER_COMPLETE,
            &WorkerComplete {
                browser: "1".to_string(),
                failed: true,
            },
        );

        let report = coordinator.await.unwrap().unwrap();
        assert!(report.any_failed);
        assert_eq!(report.failure_report.get("1").map(String::as_str), Some("m1"));
        assert_eq!(report.record.failed_browsers, vec!["1".to_string()]);
        assert_eq!(report.module_timings, vec![("m1".to_string(), 12)]);
    }
}
