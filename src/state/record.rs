//! Execution record persistence
//!
//! A record captures one run: how many workers ran, which failed, and the
//! exact ordered module sequence dispatched to each. Replay feeds a record
//! back through the pipeline; bisection shrinks it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::WorkerId;

/// File name prefix for freshly written records.
pub const RECORD_FILE_PREFIX: &str = "test-execution";

/// Persisted record of a single run.
///
/// The JSON field names are part of the on-disk format shared with replay
/// and bisection inputs; `failedModulesMap` is optional so candidate files
/// and hand-written records stay readable.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub number_of_browsers: usize,
    pub failed_browsers: Vec<WorkerId>,
    pub execution_mapping: BTreeMap<WorkerId, Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_modules_map: Option<BTreeMap<WorkerId, Vec<String>>>,
}

impl ExecutionRecord {
    /// Loads a record from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open execution record {}", path.display()))?;
        let reader = BufReader::new(file);
        let record: ExecutionRecord = serde_json::from_reader(reader)
            .with_context(|| format!("failed to parse execution record {}", path.display()))?;

        debug!("loaded execution record from {}", path.display());
        Ok(record)
    }

    /// Writes the record as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create execution record {}", path.display()))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self).context("failed to write execution record")?;

        info!("wrote execution record to {}", path.display());
        Ok(())
    }

    /// Timestamped record path inside `dir`.
    pub fn timestamped_path(dir: &Path) -> PathBuf {
        let stamp = chrono::Utc::now().timestamp_millis();
        dir.join(format!("{RECORD_FILE_PREFIX}-{stamp}.json"))
    }

    /// The failing-module sequences this record can reproduce, one per
    /// failed worker: the worker's dispatched sequence truncated after the
    /// attributed failing module (anything dispatched later is irrelevant
    /// to reproduction).
    pub fn failing_sequences(&self) -> BTreeMap<WorkerId, Vec<String>> {
        let mut sequences = BTreeMap::new();

        for worker in &self.failed_browsers {
            let Some(history) = self.execution_mapping.get(worker) else {
                continue;
            };
            if history.is_empty() {
                continue;
            }

            let attributed = self
                .failed_modules_map
                .as_ref()
                .and_then(|map| map.get(worker))
                .and_then(|modules| modules.last());

            let sequence = match attributed {
                Some(module) => match history.iter().rposition(|m| m == module) {
                    Some(index) => history[..=index].to_vec(),
                    None => history.clone(),
                },
                None => history.clone(),
            };
            sequences.insert(worker.clone(), sequence);
        }

        sequences
    }

    pub fn has_failures(&self) -> bool {
        !self.failed_browsers.is_empty()
    }
}
