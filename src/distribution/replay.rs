//! Replay queue reconstruction
//!
//! Rebuilds each worker's exact module sequence from a recorded execution.
//! A worker id the record knows always reproduces its original order
//! unmodified; what happens when the current run asks for a different
//! worker count is an explicit configuration choice, never a guess.

use std::collections::BTreeMap;

use thiserror::Error;
use tracing::warn;

use crate::models::WorkerId;
use crate::state::ExecutionRecord;

/// Policy for a worker count that differs from the recorded one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MismatchPolicy {
    /// Refuse the run, naming both counts.
    Error,
    /// Keep every surviving worker's own sequence unmodified and append the
    /// orphaned workers' modules round-robin across the survivors.
    Redistribute,
}

impl MismatchPolicy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "error" => Some(MismatchPolicy::Error),
            "redistribute" => Some(MismatchPolicy::Redistribute),
            _ => None,
        }
    }
}

/// Replay configuration errors; raised before any dispatch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("worker {worker} does not appear in the replay record")]
    UnknownWorker { worker: WorkerId },

    #[error(
        "the replay record maps {recorded} workers but {requested} were requested; \
         pass `--on-worker-mismatch redistribute` to spread the difference"
    )]
    WorkerCountMismatch { recorded: usize, requested: usize },
}

/// Builds the per-worker replay queues for this run.
///
/// `selected` narrows the replay to specific recorded worker ids (empty
/// means all of them); `requested_workers` is the `--parallel` override,
/// checked against the number of replayed queues under `policy`.
pub fn replay_queues(
    record: &ExecutionRecord,
    selected: &[WorkerId],
    requested_workers: Option<usize>,
    policy: MismatchPolicy,
) -> Result<BTreeMap<WorkerId, Vec<String>>, ReplayError> {
    let mut queues: BTreeMap<WorkerId, Vec<String>> = BTreeMap::new();

    if selected.is_empty() {
        for (worker, modules) in &record.execution_mapping {
            queues.insert(worker.clone(), modules.clone());
        }
    } else {
        for worker in selected {
            let modules = record.execution_mapping.get(worker).ok_or_else(|| {
                ReplayError::UnknownWorker {
                    worker: worker.clone(),
                }
            })?;
            queues.insert(worker.clone(), modules.clone());
        }
    }

    let Some(requested) = requested_workers else {
        return Ok(queues);
    };
    if requested == queues.len() {
        return Ok(queues);
    }

    match policy {
        MismatchPolicy::Error => Err(ReplayError::WorkerCountMismatch {
            recorded: queues.len(),
            requested,
        }),
        MismatchPolicy::Redistribute => {
            if requested > queues.len() {
                // There is nothing recorded for the extra workers to
                // replay; run with the recorded set instead.
                warn!(
                    "replay record maps {} workers, ignoring the extra {} requested",
                    queues.len(),
                    requested - queues.len()
                );
                return Ok(queues);
            }
            Ok(redistribute(queues, requested))
        }
    }
}

/// Folds the queues beyond the first `keep` workers round-robin into the
/// kept workers' queues, after their own recorded sequences.
fn redistribute(
    queues: BTreeMap<WorkerId, Vec<String>>,
    keep: usize,
) -> BTreeMap<WorkerId, Vec<String>> {
    let mut entries: Vec<(WorkerId, Vec<String>)> = queues.into_iter().collect();
    let orphaned: Vec<(WorkerId, Vec<String>)> = entries.split_off(keep);

    let kept_ids: Vec<WorkerId> = entries.iter().map(|(id, _)| id.clone()).collect();
    let mut result: BTreeMap<WorkerId, Vec<String>> = entries.into_iter().collect();

    let mut slot = 0usize;
    for (_, modules) in orphaned {
        for module in modules {
            let target = &kept_ids[slot % kept_ids.len()];
            result
                .get_mut(target)
                .expect("kept worker queue exists")
                .push(module);
            slot += 1;
        }
    }
    result
}
