//! Execution state manager
//!
//! Holds the canonical assignment of modules to workers for a single run:
//! either one shared load-balanced queue or one replay queue per worker,
//! never both. Records every dispatch in order, attributes failures, and
//! counts completed workers.
//!
//! All mutation goes through one mutex so that concurrent dispatch requests
//! never lose or duplicate a module; critical sections contain no awaits.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use thiserror::Error;

use crate::models::WorkerId;
use crate::state::record::ExecutionRecord;

/// Which queue family is driving the current run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueMode {
    Shared,
    Replay,
}

/// Invariant violations; fatal, never retried.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("the shared queue and replay queues cannot be mixed within one run")]
    ModeConflict,

    #[error("cannot record a failure for worker {worker}: no modules were dispatched to it")]
    NoDispatchHistory { worker: WorkerId },
}

#[derive(Default)]
struct Inner {
    mode: Option<QueueMode>,
    shared_queue: VecDeque<String>,
    replay_queues: BTreeMap<WorkerId, VecDeque<String>>,
    module_map: BTreeMap<WorkerId, Vec<String>>,
    failed_workers: Vec<WorkerId>,
    failed_modules: BTreeMap<WorkerId, Vec<String>>,
    completed_workers: usize,
}

impl Inner {
    fn enter_mode(&mut self, mode: QueueMode) -> Result<(), StateError> {
        match self.mode {
            None => {
                self.mode = Some(mode);
                Ok(())
            }
            Some(active) if active == mode => Ok(()),
            Some(_) => Err(StateError::ModeConflict),
        }
    }
}

/// Shared, mutex-guarded execution state for one run.
#[derive(Default)]
pub struct ExecutionState {
    inner: Mutex<Inner>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the global shared queue (load-balance mode).
    pub fn set_shared_queue(&self, modules: Vec<String>) -> Result<(), StateError> {
        let mut inner = self.inner.lock().expect("execution state poisoned");
        inner.enter_mode(QueueMode::Shared)?;
        inner.shared_queue = modules.into();
        Ok(())
    }

    /// Pops the next module from the shared queue.
    ///
    /// Each successful pop removes exactly one module; no two callers can
    /// observe the same one.
    pub fn pop_shared_queue(&self) -> Option<String> {
        let mut inner = self.inner.lock().expect("execution state poisoned");
        inner.shared_queue.pop_front()
    }

    /// Installs one worker's replay queue (replay mode).
    pub fn set_replay_queue(
        &self,
        worker: impl Into<WorkerId>,
        modules: Vec<String>,
    ) -> Result<(), StateError> {
        let mut inner = self.inner.lock().expect("execution state poisoned");
        inner.enter_mode(QueueMode::Replay)?;
        inner.replay_queues.insert(worker.into(), modules.into());
        Ok(())
    }

    /// Pops the next module from the given worker's replay queue.
    ///
    /// Popping one worker's queue never consumes from another's.
    pub fn pop_replay_queue(&self, worker: &str) -> Option<String> {
        let mut inner = self.inner.lock().expect("execution state poisoned");
        inner
            .replay_queues
            .get_mut(worker)
            .and_then(|queue| queue.pop_front())
    }

    /// The queue mode this run settled on, if any queue was installed.
    pub fn mode(&self) -> Option<QueueMode> {
        self.inner.lock().expect("execution state poisoned").mode
    }

    /// Appends `module` to the worker's dispatched history, in order.
    ///
    /// Every call represents one real dispatch; nothing is deduplicated.
    pub fn record_dispatch(&self, worker: &str, module: &str) {
        let mut inner = self.inner.lock().expect("execution state poisoned");
        inner
            .module_map
            .entry(worker.to_string())
            .or_default()
            .push(module.to_string());
    }

    /// Marks the worker failed and attributes the failure to the last
    /// module dispatched to it.
    ///
    /// Attribution is a heuristic inherited from the recorded-execution
    /// format: the last dispatched module is assumed to be the cause, not
    /// proven to be. Failing a worker with an empty history is an internal
    /// invariant violation.
    pub fn record_failure(&self, worker: &str) -> Result<(), StateError> {
        let mut inner = self.inner.lock().expect("execution state poisoned");

        let failing_module = inner
            .module_map
            .get(worker)
            .and_then(|history| history.last())
            .cloned()
            .ok_or_else(|| StateError::NoDispatchHistory {
                worker: worker.to_string(),
            })?;

        if !inner.failed_workers.iter().any(|w| w == worker) {
            inner.failed_workers.push(worker.to_string());
        }
        inner
            .failed_modules
            .entry(worker.to_string())
            .or_default()
            .push(failing_module);
        Ok(())
    }

    /// Whether the worker has been marked failed.
    pub fn contains_failed_worker(&self, worker: &str) -> bool {
        let inner = self.inner.lock().expect("execution state poisoned");
        inner.failed_workers.iter().any(|w| w == worker)
    }

    /// Read-only snapshot mapping each failed worker to its attributed
    /// failing module.
    pub fn failure_report(&self) -> BTreeMap<WorkerId, String> {
        let inner = self.inner.lock().expect("execution state poisoned");
        inner
            .failed_modules
            .iter()
            .filter_map(|(worker, modules)| {
                modules.last().map(|m| (worker.clone(), m.clone()))
            })
            .collect()
    }

    /// Snapshot of the dispatched-module history per worker.
    pub fn module_map(&self) -> BTreeMap<WorkerId, Vec<String>> {
        let inner = self.inner.lock().expect("execution state poisoned");
        inner.module_map.clone()
    }

    /// Workers flagged as failed, in the order the failures were observed.
    pub fn failed_workers(&self) -> Vec<WorkerId> {
        let inner = self.inner.lock().expect("execution state poisoned");
        inner.failed_workers.clone()
    }

    /// Number of workers that have finished.
    pub fn completed_count(&self) -> usize {
        let inner = self.inner.lock().expect("execution state poisoned");
        inner.completed_workers
    }

    pub fn increment_completed(&self) {
        let mut inner = self.inner.lock().expect("execution state poisoned");
        inner.completed_workers += 1;
    }

    /// Builds the persistable record of this run.
    pub fn build_record(&self, number_of_workers: usize) -> ExecutionRecord {
        let inner = self.inner.lock().expect("execution state poisoned");
        ExecutionRecord {
            number_of_browsers: number_of_workers,
            failed_browsers: inner.failed_workers.clone(),
            execution_mapping: inner.module_map.clone(),
            failed_modules_map: if inner.failed_modules.is_empty() {
                None
            } else {
                Some(inner.failed_modules.clone())
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Arc;

    #[test]
    fn test_shared_queue_pops_in_order() {
        let state = ExecutionState::new();
        state
            .set_shared_queue(vec!["a".into(), "b".into()])
            .unwrap();

        assert_eq!(state.pop_shared_queue().as_deref(), Some("a"));
        assert_eq!(state.pop_shared_queue().as_deref(), Some("b"));
        assert_eq!(state.pop_shared_queue(), None);
    }

    #[test]
    fn test_replay_queues_are_independent() {
        let state = ExecutionState::new();
        state.set_replay_queue("1", vec!["a".into()]).unwrap();
        state.set_replay_queue("2", vec!["b".into()]).unwrap();

        assert_eq!(state.pop_replay_queue("1").as_deref(), Some("a"));
        // Worker 1's queue is drained; worker 2's is untouched.
        assert_eq!(state.pop_replay_queue("1"), None);
        assert_eq!(state.pop_replay_queue("2").as_deref(), Some("b"));
    }

    #[test]
    fn test_mode_mixing_is_rejected() {
        let state = ExecutionState::new();
        state.set_shared_queue(vec!["a".into()]).unwrap();

        let err = state.set_replay_queue("1", vec!["b".into()]).unwrap_err();
        assert_eq!(err, StateError::ModeConflict);
        assert_eq!(state.mode(), Some(QueueMode::Shared));
    }

    #[test]
    fn test_failure_attributes_last_dispatched_module() {
        let state = ExecutionState::new();
        state.record_dispatch("1", "modA");
        state.record_dispatch("1", "modB");
        state.record_dispatch("1", "modC");

        state.record_failure("1").unwrap();

        assert!(state.contains_failed_worker("1"));
        let report = state.failure_report();
        assert_eq!(report.get("1").map(String::as_str), Some("modC"));
    }

    #[test]
    fn test_failure_without_history_is_invariant_violation() {
        let state = ExecutionState::new();
        let err = state.record_failure("7").unwrap_err();
        assert_eq!(
            err,
            StateError::NoDispatchHistory {
                worker: "7".to_string()
            }
        );
    }

    #[test]
    fn test_completed_counter() {
        let state = ExecutionState::new();
        assert_eq!(state.completed_count(), 0);
        state.increment_completed();
        state.increment_completed();
        assert_eq!(state.completed_count(), 2);
    }

    #[test]
    fn test_build_record_shape() {
        let state = ExecutionState::new();
        state.record_dispatch("1", "modA");
        state.record_dispatch("2", "modB");
        state.record_failure("2").unwrap();

        let record = state.build_record(2);
        assert_eq!(record.number_of_browsers, 2);
        assert_eq!(record.failed_browsers, vec!["2".to_string()]);
        assert_eq!(record.execution_mapping["1"], vec!["modA"]);
        let failed = record.failed_modules_map.unwrap();
        assert_eq!(failed["2"], vec!["modB"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_pops_never_duplicate() {
        let state = Arc::new(ExecutionState::new());
        state
            .set_shared_queue(vec!["a".into(), "b".into()])
            .unwrap();

        let first = {
            let state = state.clone();
            tokio::spawn(async move { state.pop_shared_queue() })
        };
        let second = {
            let state = state.clone();
            tokio::spawn(async move { state.pop_shared_queue() })
        };

        let popped: BTreeSet<String> = [first.await.unwrap(), second.await.unwrap()]
            .into_iter()
            .flatten()
            .collect();

        // Together the pops return {a, b}: each exactly once, neither twice.
        assert_eq!(popped.len(), 2);
        assert!(popped.contains("a") && popped.contains("b"));
        assert_eq!(state.pop_shared_queue(), None);
    }
}
