//! Cost weighting for the load-balanced queue
//!
//! Sorts modules so the most expensive ones are dispatched first. Fast
//! workers that drain early then keep pulling from a queue of ever cheaper
//! modules, which minimizes tail latency across workers of unequal speed.
//!
//! Costs come from a timing history recorded by previous load-balanced
//! runs; a module with no history gets a uniform default weight, and an
//! empty history leaves the input order untouched (the sort is stable).

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Weight assigned to modules with no recorded timing.
const DEFAULT_WEIGHT_MS: u64 = 1;

/// Mean per-module durations from prior runs, in milliseconds.
#[derive(Clone, Debug, Default)]
pub struct TimingHistory {
    mean_ms: BTreeMap<String, u64>,
}

impl TimingHistory {
    /// Loads a history file; a missing file is an empty history.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("no timing history at {}", path.display());
            return Ok(Self::default());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open timing history {}", path.display()))?;
        let reader = BufReader::new(file);
        let mean_ms: BTreeMap<String, u64> = serde_json::from_reader(reader)
            .with_context(|| format!("failed to parse timing history {}", path.display()))?;

        debug!(
            "loaded timings for {} modules from {}",
            mean_ms.len(),
            path.display()
        );
        Ok(Self { mean_ms })
    }

    /// Writes the history as JSON, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create timing history dir {}", parent.display())
            })?;
        }

        let file = File::create(path)
            .with_context(|| format!("failed to create timing history {}", path.display()))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, &self.mean_ms)
            .context("failed to write timing history")?;

        info!("wrote timing history to {}", path.display());
        Ok(())
    }

    /// Default history location under the user data directory.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("testshard")
            .join("module-timings.json")
    }

    pub fn get(&self, module: &str) -> Option<u64> {
        self.mean_ms.get(module).copied()
    }

    /// Folds a fresh observation into the stored mean.
    pub fn record(&mut self, module: &str, duration_ms: u64) {
        self.mean_ms
            .entry(module.to_string())
            .and_modify(|mean| *mean = (*mean + duration_ms) / 2)
            .or_insert(duration_ms);
    }

    pub fn is_empty(&self) -> bool {
        self.mean_ms.is_empty()
    }
}

/// Sorts modules most-expensive-first by recorded cost.
///
/// Stable: modules with equal weight (including everything when the
/// history is empty) keep their original relative order.
pub fn weight_modules(modules: Vec<String>, history: &TimingHistory) -> Vec<String> {
    let mut weighted: Vec<(u64, String)> = modules
        .into_iter()
        .map(|module| {
            let weight = history.get(&module).unwrap_or(DEFAULT_WEIGHT_MS);
            (weight, module)
        })
        .collect();

    weighted.sort_by(|a, b| b.0.cmp(&a.0));
    weighted.into_iter().map(|(_, module)| module).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn modules(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expensive_modules_come_first() {
        let mut history = TimingHistory::default();
        history.record("slow", 5000);
        history.record("medium", 500);
        history.record("fast", 10);

        let sorted = weight_modules(modules(&["fast", "slow", "medium"]), &history);
        assert_eq!(sorted, modules(&["slow", "medium", "fast"]));
    }

    #[test]
    fn test_uniform_weights_preserve_order() {
        let history = TimingHistory::default();
        let input = modules(&["a", "b", "c"]);
        assert_eq!(weight_modules(input.clone(), &history), input);
    }

    #[test]
    fn test_unknown_modules_sink_below_timed_ones() {
        let mut history = TimingHistory::default();
        history.record("timed", 100);

        let sorted = weight_modules(modules(&["new", "timed"]), &history);
        assert_eq!(sorted, modules(&["timed", "new"]));
    }

    #[test]
    fn test_record_folds_into_mean() {
        let mut history = TimingHistory::default();
        history.record("m", 100);
        history.record("m", 200);
        assert_eq!(history.get("m"), Some(150));
    }

    #[test]
    fn test_history_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("timings.json");

        let mut history = TimingHistory::default();
        history.record("a", 120);
        history.save(&path).unwrap();

        let loaded = TimingHistory::load(&path).unwrap();
        assert_eq!(loaded.get("a"), Some(120));
    }

    #[test]
    fn test_missing_history_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = TimingHistory::load(&dir.path().join("absent.json")).unwrap();
        assert!(history.is_empty());
    }
}
