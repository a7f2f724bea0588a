//! Bisection candidate files
//!
//! A candidate is a single-worker replay input: the failing worker's module
//! sequence remapped onto worker "1", so one isolated run of the pipeline
//! can attempt to reproduce the failure.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::models::WorkerId;
use crate::state::ExecutionRecord;

/// The replay-input worker id every candidate is remapped to.
const CANDIDATE_WORKER: &str = "1";

/// Builds the single-worker record for a candidate module sequence.
pub fn candidate_record(modules: &[String]) -> ExecutionRecord {
    ExecutionRecord {
        number_of_browsers: 1,
        failed_browsers: vec![CANDIDATE_WORKER.to_string()],
        execution_mapping: BTreeMap::from([(CANDIDATE_WORKER.to_string(), modules.to_vec())]),
        failed_modules_map: None,
    }
}

/// Candidate file name for a failed worker; `probe` numbers the narrowing
/// iterations after the initial full-sequence candidate.
pub fn candidate_file_name(worker: &WorkerId, probe: Option<usize>) -> String {
    match probe {
        None => format!("te-{worker}.json"),
        Some(n) => format!("te-{worker}.{n}.json"),
    }
}

/// Writes a candidate file into `dir` and returns its path.
pub fn write_candidate(dir: &Path, file_name: &str, modules: &[String]) -> Result<PathBuf> {
    let path = dir.join(file_name);
    candidate_record(modules).save(&path)?;
    debug!("wrote bisection candidate {}", path.display());
    Ok(path)
}
