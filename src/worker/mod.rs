//! Worker-side execution loops
//!
//! A worker either pulls modules one at a time over the dispatch protocol
//! (load-balance and replay modes) or walks a statically assigned partition
//! without touching the channel. Either way each module goes through the
//! configured loader and its outcome is collected into a summary.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use tracing::{error, warn};

use crate::channel::{EventBus, ModuleResult, WorkerComplete, EVENT_MODULE_RESULT, EVENT_WORKER_COMPLETE};
use crate::dispatch::{AsyncModuleIterator, DispatchOptions, DEFAULT_ASYNC_TIMEOUT};
use crate::loader::{load_one, ModuleLoader};
use crate::models::{ModuleOutcome, WorkerId, WorkerSummary};

/// How many whole exchanges are retried after the dispatcher itself gave
/// up, before the worker is abandoned.
const EXCHANGE_RETRY_LIMIT: u32 = 3;

/// Per-worker tuning.
#[derive(Clone, Debug)]
pub struct WorkerOptions {
    /// Initial dispatch response timeout.
    pub async_timeout: Duration,
    /// Escalate dispatch exhaustion into aborting the whole run instead of
    /// abandoning just this worker.
    pub exit_on_error: bool,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            async_timeout: DEFAULT_ASYNC_TIMEOUT,
            exit_on_error: false,
        }
    }
}

/// Result of one worker's run.
#[derive(Clone, Debug)]
pub struct WorkerRun {
    pub summary: WorkerSummary,
    /// The worker stopped because dispatch kept timing out, not because its
    /// queue was drained.
    pub abandoned: bool,
}

/// One worker: a dispatch iterator composed with a module loader.
pub struct WorkerRunner {
    id: WorkerId,
    bus: EventBus,
    loader: Arc<dyn ModuleLoader>,
    options: WorkerOptions,
}

impl WorkerRunner {
    pub fn new(
        bus: &EventBus,
        id: impl Into<WorkerId>,
        loader: Arc<dyn ModuleLoader>,
        options: WorkerOptions,
    ) -> Self {
        Self {
            id: id.into(),
            bus: bus.clone(),
            loader,
            options,
        }
    }

    /// Pulls modules over the dispatch protocol until the queue is drained.
    ///
    /// Dispatch timeouts that survive the iterator's own retries are retried
    /// as whole exchanges up to a small limit; past that the worker either
    /// fails the run (`exit_on_error`) or is abandoned gracefully with
    /// whatever it managed to execute.
    pub async fn run_pulling(self) -> Result<WorkerRun> {
        let mut iterator = AsyncModuleIterator::new(
            &self.bus,
            self.id.clone(),
            DispatchOptions {
                timeout: self.options.async_timeout,
                ..DispatchOptions::default()
            },
        );

        let mut outcomes: Vec<ModuleOutcome> = Vec::new();
        let mut retry_count = 0;
        let mut abandoned = false;

        loop {
            match iterator.next().await {
                Ok(Some(module)) => {
                    retry_count = 0;
                    let outcome = load_one(self.loader.as_ref(), &module).await;
                    self.publish_result(&outcome);
                    outcomes.push(outcome);
                }
                Ok(None) => break,
                Err(e) => {
                    if retry_count >= EXCHANGE_RETRY_LIMIT {
                        let message = format!(
                            "failed to get next test module after {EXCHANGE_RETRY_LIMIT} retries: {e}"
                        );
                        if self.options.exit_on_error {
                            self.publish_complete(true);
                            bail!("worker {}: {message}", self.id);
                        }
                        error!(
                            "worker {}: {message}; closing worker to exit gracefully",
                            self.id
                        );
                        abandoned = true;
                        break;
                    }
                    retry_count += 1;
                    warn!(
                        "worker {}: {e}; retrying request ({retry_count}/{EXCHANGE_RETRY_LIMIT})",
                        self.id
                    );
                }
            }
        }

        let summary = WorkerSummary::new(self.id.clone(), outcomes);
        self.publish_complete(summary.has_failures() || abandoned);
        Ok(WorkerRun { summary, abandoned })
    }

    /// Executes a statically assigned partition, bypassing the channel.
    pub async fn run_static(self, modules: Vec<String>) -> WorkerRun {
        let mut outcomes = Vec::with_capacity(modules.len());
        for module in modules {
            outcomes.push(load_one(self.loader.as_ref(), &module).await);
        }
        WorkerRun {
            summary: WorkerSummary::new(self.id, outcomes),
            abandoned: false,
        }
    }

    fn publish_result(&self, outcome: &ModuleOutcome) {
        self.bus.emit_json(
            EVENT_MODULE_RESULT,
            &ModuleResult {
                browser: self.id.clone(),
                module: outcome.module.clone(),
                passed: outcome.is_success(),
                duration_ms: outcome.duration_ms,
                error: outcome.message.clone(),
            },
        );
    }

    fn publish_complete(&self, failed: bool) {
        self.bus.emit_json(
            EVENT_WORKER_COMPLETE,
            &WorkerComplete {
                browser: self.id.clone(),
                failed,
            },
        );
    }
}
