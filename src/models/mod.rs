//! Result models for module execution
//!
//! Defines module outcomes, statuses, and per-worker/run summaries.

#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one worker connection.
///
/// Assigned by the caller; the core treats it as an opaque key. Stored as a
/// string because execution-record JSON keys are strings.
pub type WorkerId = String;

/// Outcome status of one module execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Pass,
    Fail,
    /// The module could not be loaded or its command could not be started.
    /// Reported as a failing result, never as a run abort.
    Error,
}

impl ModuleStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            ModuleStatus::Pass => "✓",
            ModuleStatus::Fail => "✗",
            ModuleStatus::Error => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ModuleStatus::Pass)
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleStatus::Pass => write!(f, "PASS"),
            ModuleStatus::Fail => write!(f, "FAIL"),
            ModuleStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of executing a single module
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModuleOutcome {
    pub module: String,
    pub status: ModuleStatus,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl ModuleOutcome {
    pub fn pass(module: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            module: module.into(),
            status: ModuleStatus::Pass,
            duration_ms,
            message: None,
        }
    }

    pub fn fail(module: impl Into<String>, duration_ms: u64, message: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            status: ModuleStatus::Fail,
            duration_ms,
            message: Some(message.into()),
        }
    }

    pub fn error(module: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            status: ModuleStatus::Error,
            duration_ms: 0,
            message: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl fmt::Display for ModuleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.module,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Summary of one worker's execution
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerSummary {
    pub worker: WorkerId,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub total_duration_ms: u64,
    pub outcomes: Vec<ModuleOutcome>,
}

impl WorkerSummary {
    pub fn new(worker: impl Into<WorkerId>, outcomes: Vec<ModuleOutcome>) -> Self {
        let total = outcomes.len();
        let passed = outcomes
            .iter()
            .filter(|o| o.status == ModuleStatus::Pass)
            .count();
        let failed = outcomes
            .iter()
            .filter(|o| o.status == ModuleStatus::Fail)
            .count();
        let errors = outcomes
            .iter()
            .filter(|o| o.status == ModuleStatus::Error)
            .count();
        let total_duration_ms = outcomes.iter().map(|o| o.duration_ms).sum();

        Self {
            worker: worker.into(),
            total,
            passed,
            failed,
            errors,
            total_duration_ms,
            outcomes,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed + self.errors > 0
    }
}

/// Summary of the whole run across workers
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub total_duration_ms: u64,
    pub workers: Vec<WorkerSummary>,
}

impl RunSummary {
    pub fn new(mut workers: Vec<WorkerSummary>) -> Self {
        workers.sort_by(|a, b| a.worker.cmp(&b.worker));

        let total = workers.iter().map(|w| w.total).sum();
        let passed = workers.iter().map(|w| w.passed).sum();
        let failed = workers.iter().map(|w| w.failed).sum();
        let errors = workers.iter().map(|w| w.errors).sum();
        let total_duration_ms = workers.iter().map(|w| w.total_duration_ms).sum();

        Self {
            total,
            passed,
            failed,
            errors,
            total_duration_ms,
            workers,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed + self.errors > 0
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for worker in &self.workers {
            writeln!(f, "Worker {}", worker.worker)?;
            for outcome in &worker.outcomes {
                writeln!(f, "  {outcome}")?;
            }
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Error: {}",
            self.total, self.passed, self.failed, self.errors
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_creation() {
        let outcome = ModuleOutcome::pass("tests/unit/a", 100);
        assert!(outcome.is_success());
        assert_eq!(outcome.duration_ms, 100);
    }

    #[test]
    fn test_worker_summary_counts() {
        let outcomes = vec![
            ModuleOutcome::pass("a", 100),
            ModuleOutcome::fail("b", 50, "assertion failed"),
            ModuleOutcome::error("c", "command not found"),
        ];

        let summary = WorkerSummary::new("1", outcomes);
        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors, 1);
        assert!(summary.has_failures());
    }

    #[test]
    fn test_run_summary_sorts_workers() {
        let summary = RunSummary::new(vec![
            WorkerSummary::new("2", vec![ModuleOutcome::pass("b", 1)]),
            WorkerSummary::new("1", vec![ModuleOutcome::pass("a", 1)]),
        ]);

        assert_eq!(summary.workers[0].worker, "1");
        assert_eq!(summary.total, 2);
        assert!(!summary.has_failures());
        assert_eq!(summary.pass_rate(), 100.0);
    }
}
