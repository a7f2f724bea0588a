//! Bisection driver
//!
//! Per failed worker: replay the full failing sequence in an isolated
//! subprocess, then narrow it by binary search — test each half, recurse
//! into whichever half still reproduces, and fall back to eliminating one
//! module at a time when the failure needs modules from both halves.
//! Every probe becomes one row of the results table.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::bisect::candidate::{candidate_file_name, write_candidate};
use crate::models::WorkerId;
use crate::state::ExecutionRecord;

/// Bisection infrastructure failures; fatal and distinct from "the failure
/// did not reproduce".
#[derive(Error, Debug)]
pub enum BisectError {
    #[error("no failed workers in the replay record; nothing to bisect")]
    NoFailures,

    #[error("build artifact not found at {path}; pass `--path` to an existing build")]
    MissingArtifact { path: String },

    #[error("failed to launch replay subprocess `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Result of one probe invocation.
#[derive(Clone, Debug)]
pub struct ProbeOutcome {
    pub reproduced: bool,
    pub command: String,
}

/// One row of the bisection results table.
#[derive(Clone, Debug, serde::Serialize)]
pub struct BisectRow {
    pub file: String,
    pub reproduced: bool,
    pub command: String,
}

/// Everything the driver learned.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct BisectReport {
    pub rows: Vec<BisectRow>,
    /// Failed worker → smallest module subset that still reproduced.
    pub minimal: BTreeMap<WorkerId, Vec<String>>,
    pub reproduced_any: bool,
}

/// Re-runs the pipeline against a candidate file.
#[async_trait]
pub trait ReplayProbe: Send + Sync {
    async fn run(&self, candidate: &Path) -> Result<ProbeOutcome>;
}

/// Production probe: invokes this executable's `run` subcommand with the
/// candidate as the replay input and reads the exit code.
#[derive(Debug)]
pub struct SubprocessProbe {
    exe: PathBuf,
    artifact: Option<PathBuf>,
    exec: Option<String>,
}

impl SubprocessProbe {
    /// Creates a probe, verifying the artifact directory up front — a
    /// missing build is a configuration error, not a failed reproduction.
    pub fn new(
        exe: PathBuf,
        artifact: Option<PathBuf>,
        exec: Option<String>,
    ) -> Result<Self, BisectError> {
        if let Some(dir) = &artifact {
            if !dir.is_dir() {
                return Err(BisectError::MissingArtifact {
                    path: dir.display().to_string(),
                });
            }
        }
        Ok(Self {
            exe,
            artifact,
            exec,
        })
    }
}

#[async_trait]
impl ReplayProbe for SubprocessProbe {
    async fn run(&self, candidate: &Path) -> Result<ProbeOutcome> {
        let mut command = tokio::process::Command::new(&self.exe);
        command
            .arg("run")
            .arg("--replay-execution")
            .arg(candidate)
            .arg("--replay-browser")
            .arg("1");
        if let Some(dir) = &self.artifact {
            command.arg("--path").arg(dir);
        }
        if let Some(template) = &self.exec {
            command.arg("--exec").arg(template);
        }

        let cmd_line = format!(
            "{} run --replay-execution {} --replay-browser 1{}{}",
            self.exe.display(),
            candidate.display(),
            self.artifact
                .as_ref()
                .map(|d| format!(" --path {}", d.display()))
                .unwrap_or_default(),
            self.exec
                .as_ref()
                .map(|t| format!(" --exec '{t}'"))
                .unwrap_or_default(),
        );

        info!("executing: {}", cmd_line);
        let status = command.status().await.map_err(|source| BisectError::Launch {
            command: cmd_line.clone(),
            source,
        })?;

        Ok(ProbeOutcome {
            reproduced: !status.success(),
            command: cmd_line,
        })
    }
}

/// Drives the bisection of one execution record.
pub struct BisectDriver<P: ReplayProbe> {
    probe: P,
    output_dir: PathBuf,
    narrow: bool,
}

impl<P: ReplayProbe> BisectDriver<P> {
    pub fn new(probe: P, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            probe,
            output_dir: output_dir.into(),
            narrow: true,
        }
    }

    /// Disable the narrowing search; only the full failing sequences are
    /// replayed and reported.
    pub fn without_narrowing(mut self) -> Self {
        self.narrow = false;
        self
    }

    pub async fn run(&self, record: &ExecutionRecord) -> Result<BisectReport> {
        let sequences = record.failing_sequences();
        if sequences.is_empty() {
            return Err(BisectError::NoFailures.into());
        }

        let mut report = BisectReport::default();

        for (worker, modules) in sequences {
            let file = candidate_file_name(&worker, None);
            let reproduced = self
                .probe_candidate(&file, &modules, &mut report.rows)
                .await?;

            if !reproduced {
                info!("worker {worker}: failure did not reproduce from the full sequence");
                continue;
            }
            report.reproduced_any = true;

            let minimal = if self.narrow && modules.len() > 1 {
                self.narrow_sequence(&worker, modules, &mut report.rows)
                    .await?
            } else {
                modules
            };
            info!(
                "worker {worker}: minimal reproducing subset has {} module(s)",
                minimal.len()
            );
            report.minimal.insert(worker, minimal);
        }

        Ok(report)
    }

    /// Writes one candidate file, probes it, and records the table row.
    async fn probe_candidate(
        &self,
        file: &str,
        modules: &[String],
        rows: &mut Vec<BisectRow>,
    ) -> Result<bool> {
        let path = write_candidate(&self.output_dir, file, modules)?;
        let outcome = self.probe.run(&path).await?;
        rows.push(BisectRow {
            file: file.to_string(),
            reproduced: outcome.reproduced,
            command: outcome.command,
        });
        Ok(outcome.reproduced)
    }

    /// Binary search over a sequence known to reproduce the failure.
    async fn narrow_sequence(
        &self,
        worker: &WorkerId,
        full: Vec<String>,
        rows: &mut Vec<BisectRow>,
    ) -> Result<Vec<String>> {
        let mut current = full;
        let mut probe_index = 0usize;

        while current.len() > 1 {
            let mid = current.len() / 2;
            let halves = [current[..mid].to_vec(), current[mid..].to_vec()];

            let mut reproducing_half = None;
            for half in halves {
                probe_index += 1;
                let file = candidate_file_name(worker, Some(probe_index));
                if self.probe_candidate(&file, &half, rows).await? {
                    reproducing_half = Some(half);
                    break;
                }
            }
            if let Some(half) = reproducing_half {
                current = half;
                continue;
            }

            // Neither half alone reproduces: the failure needs modules from
            // both. Eliminate one module at a time instead.
            let mut removed_any = false;
            let mut index = 0;
            while index < current.len() && current.len() > 1 {
                let mut candidate = current.clone();
                candidate.remove(index);

                probe_index += 1;
                let file = candidate_file_name(worker, Some(probe_index));
                if self.probe_candidate(&file, &candidate, rows).await? {
                    current = candidate;
                    removed_any = true;
                } else {
                    index += 1;
                }
            }

            if !removed_any {
                // Every remaining module is necessary.
                break;
            }
        }

        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Probe that reproduces whenever the candidate contains every culprit.
    struct FakeProbe {
        culprits: BTreeSet<String>,
        invocations: Mutex<usize>,
    }

    impl FakeProbe {
        fn new(culprits: &[&str]) -> Self {
            Self {
                culprits: culprits.iter().map(|s| s.to_string()).collect(),
                invocations: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl ReplayProbe for FakeProbe {
        async fn run(&self, candidate: &Path) -> Result<ProbeOutcome> {
            *self.invocations.lock().unwrap() += 1;
            let record = ExecutionRecord::load(candidate)?;
            let modules: BTreeSet<String> =
                record.execution_mapping["1"].iter().cloned().collect();
            Ok(ProbeOutcome {
                reproduced: self.culprits.is_subset(&modules),
                command: format!("probe {}", candidate.display()),
            })
        }
    }

    fn record(worker: &str, modules: &[&str]) -> ExecutionRecord {
        ExecutionRecord {
            number_of_browsers: 1,
            failed_browsers: vec![worker.to_string()],
            execution_mapping: BTreeMap::from([(
                worker.to_string(),
                modules.iter().map(|s| s.to_string()).collect(),
            )]),
            failed_modules_map: None,
        }
    }

    #[tokio::test]
    async fn test_single_culprit_narrows_to_one_module() {
        let dir = tempfile::tempdir().unwrap();
        let driver = BisectDriver::new(FakeProbe::new(&["m3"]), dir.path());

        let report = driver
            .run(&record("2", &["m1", "m2", "m3", "m4"]))
            .await
            .unwrap();

        assert!(report.reproduced_any);
        assert_eq!(report.minimal["2"], vec!["m3"]);
        // The initial full-sequence probe reproduced too.
        assert!(report.rows[0].reproduced);
        assert_eq!(report.rows[0].file, "te-2.json");
    }

    #[tokio::test]
    async fn test_cross_half_interaction_falls_back_to_elimination() {
        let dir = tempfile::tempdir().unwrap();
        // m1 and m4 sit in different halves; no half alone reproduces.
        let driver = BisectDriver::new(FakeProbe::new(&["m1", "m4"]), dir.path());

        let report = driver
            .run(&record("1", &["m1", "m2", "m3", "m4"]))
            .await
            .unwrap();

        let minimal: BTreeSet<String> = report.minimal["1"].iter().cloned().collect();
        assert_eq!(
            minimal,
            BTreeSet::from(["m1".to_string(), "m4".to_string()])
        );
    }

    #[tokio::test]
    async fn test_unreproduced_failure_is_reported_not_narrowed() {
        let dir = tempfile::tempdir().unwrap();
        let driver = BisectDriver::new(FakeProbe::new(&["absent"]), dir.path());

        let report = driver.run(&record("1", &["m1", "m2"])).await.unwrap();

        assert!(!report.reproduced_any);
        assert!(report.minimal.is_empty());
        assert_eq!(report.rows.len(), 1);
        assert!(!report.rows[0].reproduced);
    }

    #[tokio::test]
    async fn test_narrowing_can_be_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let probe = FakeProbe::new(&["m2"]);
        let driver = BisectDriver::new(probe, dir.path()).without_narrowing();

        let report = driver.run(&record("1", &["m1", "m2", "m3"])).await.unwrap();

        assert_eq!(report.minimal["1"], vec!["m1", "m2", "m3"]);
        assert_eq!(*driver.probe.invocations.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_record_without_failures_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let driver = BisectDriver::new(FakeProbe::new(&["m1"]), dir.path());

        let mut empty = record("1", &["m1"]);
        empty.failed_browsers.clear();

        let err = driver.run(&empty).await.unwrap_err();
        assert!(err.to_string().contains("nothing to bisect"));
    }

    #[test]
    fn test_missing_artifact_is_fatal_configuration_error() {
        let err = SubprocessProbe::new(
            PathBuf::from("testshard"),
            Some(PathBuf::from("/nonexistent/bisect-dist")),
            None,
        )
        .unwrap_err();

        assert!(matches!(err, BisectError::MissingArtifact { .. }));
        assert!(err.to_string().contains("build artifact not found"));
    }
}
