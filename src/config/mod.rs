//! Run configuration
//!
//! Resolves CLI arguments and environment overrides into a validated
//! [`RunPlan`] with exactly one distribution mode. Every configuration
//! error here is raised before a single module is dispatched.

pub mod env;

pub use env::EnvConfig;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::cli::RunArgs;
use crate::distribution::{validate_partitions, MismatchPolicy, SplitError};
use crate::models::WorkerId;
use crate::output::OutputFormat;

const DEFAULT_ASYNC_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MODULE_TIMEOUT_SECS: u64 = 300;

/// Configuration errors, reported before dispatch begins.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error(transparent)]
    Split(#[from] SplitError),

    #[error("the `load-balance` option cannot be used with `replay-execution`")]
    LoadBalanceWithReplay,

    #[error("the `split` and `partition` options cannot be used with `replay-execution`")]
    SplitWithReplay,

    #[error("the `split` and `partition` options cannot be used with `load-balance`")]
    SplitWithLoadBalance,

    #[error("`replay-browser` requires `replay-execution`")]
    ReplayBrowserWithoutReplay,

    #[error("`parallel` must be at least 1")]
    NoWorkers,

    #[error("a `module-list` file is required unless `replay-execution` is given")]
    MissingModuleList,

    #[error("`parallel` must match the number of selected partitions ({partitions}), got {parallel}")]
    PartitionWorkerMismatch { partitions: usize, parallel: usize },

    #[error("unknown `on-worker-mismatch` policy: {value} (expected error or redistribute)")]
    UnknownMismatchPolicy { value: String },
}

/// The distribution mode a run settled on; exactly one per run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Static partitions, assigned up front, no channel coordination.
    Static { split: usize, partitions: Vec<usize> },
    /// One shared queue every worker pulls from.
    LoadBalance,
    /// Exact reproduction of a recorded run.
    Replay {
        file: PathBuf,
        browsers: Vec<WorkerId>,
        mismatch: MismatchPolicy,
    },
}

/// Validated configuration for one run.
#[derive(Clone, Debug)]
pub struct RunPlan {
    pub mode: RunMode,
    pub module_list: Option<PathBuf>,
    /// Explicit `--parallel` override; `None` lets the mode pick (1 for
    /// static and load-balance, the recorded worker set for replay).
    pub workers: Option<usize>,
    pub seed: Option<u64>,
    pub filter: Option<String>,
    pub async_timeout: Duration,
    pub module_timeout: Duration,
    pub exec: Option<String>,
    pub artifact: Option<PathBuf>,
    pub exit_on_error: bool,
    pub write_execution_file: bool,
    pub timing_file: PathBuf,
    pub format: OutputFormat,
}

impl RunPlan {
    /// Builds and validates the plan; CLI values win over the environment.
    pub fn from_args(args: &RunArgs, env: &EnvConfig) -> Result<Self, PlanError> {
        if args.parallel == Some(0) {
            return Err(PlanError::NoWorkers);
        }

        let has_split_options = args.split.is_some() || !args.partition.is_empty();

        let mode = if let Some(file) = &args.replay_execution {
            if args.load_balance {
                return Err(PlanError::LoadBalanceWithReplay);
            }
            if has_split_options {
                return Err(PlanError::SplitWithReplay);
            }
            let mismatch = MismatchPolicy::from_str(&args.on_worker_mismatch).ok_or_else(|| {
                PlanError::UnknownMismatchPolicy {
                    value: args.on_worker_mismatch.clone(),
                }
            })?;
            RunMode::Replay {
                file: file.clone(),
                browsers: args.replay_browser.clone(),
                mismatch,
            }
        } else if args.load_balance {
            if has_split_options {
                return Err(PlanError::SplitWithLoadBalance);
            }
            RunMode::LoadBalance
        } else {
            if !args.replay_browser.is_empty() {
                return Err(PlanError::ReplayBrowserWithoutReplay);
            }
            validate_partitions(args.split, &args.partition)?;

            let split = args.split.unwrap_or(1).max(1);
            let partitions = if args.partition.is_empty() {
                (1..=split).collect()
            } else {
                args.partition.clone()
            };

            if let Some(parallel) = args.parallel {
                if parallel > 1 && parallel != partitions.len() {
                    return Err(PlanError::PartitionWorkerMismatch {
                        partitions: partitions.len(),
                        parallel,
                    });
                }
            }
            RunMode::Static { split, partitions }
        };

        if !matches!(mode, RunMode::Replay { .. }) && args.module_list.is_none() {
            return Err(PlanError::MissingModuleList);
        }

        let format_name = args
            .format
            .clone()
            .unwrap_or_else(|| env.format_or("table"));
        let format = OutputFormat::from_str(&format_name).unwrap_or(OutputFormat::Table);

        let timing_file = args
            .timing_file
            .clone()
            .or_else(|| env.timing_file.clone().map(PathBuf::from))
            .unwrap_or_else(crate::distribution::TimingHistory::default_path);

        Ok(Self {
            mode,
            module_list: args.module_list.clone(),
            workers: args.parallel,
            seed: args.seed,
            filter: args.filter.clone(),
            async_timeout: Duration::from_secs(
                args.async_timeout
                    .unwrap_or_else(|| env.async_timeout_or(DEFAULT_ASYNC_TIMEOUT_SECS)),
            ),
            module_timeout: Duration::from_secs(
                args.module_timeout
                    .unwrap_or_else(|| env.module_timeout_or(DEFAULT_MODULE_TIMEOUT_SECS)),
            ),
            exec: args.exec.clone(),
            artifact: args.path.clone(),
            exit_on_error: args.exit_on_error,
            write_execution_file: args.write_execution_file,
            timing_file,
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> RunArgs {
        RunArgs {
            module_list: Some(PathBuf::from("modules.txt")),
            split: None,
            partition: Vec::new(),
            parallel: None,
            load_balance: false,
            seed: None,
            filter: None,
            replay_execution: None,
            replay_browser: Vec::new(),
            on_worker_mismatch: "error".to_string(),
            path: None,
            exec: None,
            async_timeout: None,
            module_timeout: None,
            exit_on_error: false,
            write_execution_file: false,
            timing_file: None,
            format: None,
        }
    }

    #[test]
    fn test_default_plan_is_single_static_partition() {
        let plan = RunPlan::from_args(&base_args(), &EnvConfig::default()).unwrap();

        assert_eq!(
            plan.mode,
            RunMode::Static {
                split: 1,
                partitions: vec![1]
            }
        );
        assert_eq!(plan.workers, None);
        assert_eq!(plan.async_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_partition_without_split_is_rejected() {
        let mut args = base_args();
        args.partition = vec![2];

        let err = RunPlan::from_args(&args, &EnvConfig::default()).unwrap_err();
        assert!(err.to_string().contains("specify a `split` value"));
    }

    #[test]
    fn test_partition_above_split_is_rejected() {
        let mut args = base_args();
        args.split = Some(3);
        args.partition = vec![4];

        let err = RunPlan::from_args(&args, &EnvConfig::default()).unwrap_err();
        assert!(err
            .to_string()
            .contains("less than or equal to your `split`"));
    }

    #[test]
    fn test_mode_mixing_is_rejected() {
        let mut args = base_args();
        args.load_balance = true;
        args.replay_execution = Some(PathBuf::from("te.json"));
        assert_eq!(
            RunPlan::from_args(&args, &EnvConfig::default()).unwrap_err(),
            PlanError::LoadBalanceWithReplay
        );

        let mut args = base_args();
        args.split = Some(2);
        args.replay_execution = Some(PathBuf::from("te.json"));
        assert_eq!(
            RunPlan::from_args(&args, &EnvConfig::default()).unwrap_err(),
            PlanError::SplitWithReplay
        );

        let mut args = base_args();
        args.split = Some(2);
        args.load_balance = true;
        assert_eq!(
            RunPlan::from_args(&args, &EnvConfig::default()).unwrap_err(),
            PlanError::SplitWithLoadBalance
        );
    }

    #[test]
    fn test_replay_does_not_need_module_list() {
        let mut args = base_args();
        args.module_list = None;
        args.replay_execution = Some(PathBuf::from("te.json"));

        let plan = RunPlan::from_args(&args, &EnvConfig::default()).unwrap();
        assert!(matches!(plan.mode, RunMode::Replay { .. }));
    }

    #[test]
    fn test_load_balance_needs_module_list() {
        let mut args = base_args();
        args.module_list = None;
        args.load_balance = true;

        assert_eq!(
            RunPlan::from_args(&args, &EnvConfig::default()).unwrap_err(),
            PlanError::MissingModuleList
        );
    }

    #[test]
    fn test_parallel_static_requires_matching_partitions() {
        let mut args = base_args();
        args.split = Some(3);
        args.parallel = Some(2);

        let err = RunPlan::from_args(&args, &EnvConfig::default()).unwrap_err();
        assert_eq!(
            err,
            PlanError::PartitionWorkerMismatch {
                partitions: 3,
                parallel: 2
            }
        );

        let mut args = base_args();
        args.split = Some(3);
        args.parallel = Some(3);
        let plan = RunPlan::from_args(&args, &EnvConfig::default()).unwrap();
        assert_eq!(
            plan.mode,
            RunMode::Static {
                split: 3,
                partitions: vec![1, 2, 3]
            }
        );
    }

    #[test]
    fn test_unknown_mismatch_policy_is_rejected() {
        let mut args = base_args();
        args.replay_execution = Some(PathBuf::from("te.json"));
        args.on_worker_mismatch = "clamp".to_string();

        let err = RunPlan::from_args(&args, &EnvConfig::default()).unwrap_err();
        assert!(err.to_string().contains("unknown `on-worker-mismatch`"));
    }

    #[test]
    fn test_env_supplies_timeout_when_cli_is_silent() {
        let env = EnvConfig {
            async_timeout: Some(9),
            ..EnvConfig::default()
        };

        let plan = RunPlan::from_args(&base_args(), &env).unwrap();
        assert_eq!(plan.async_timeout, Duration::from_secs(9));

        let mut args = base_args();
        args.async_timeout = Some(2);
        let plan = RunPlan::from_args(&args, &env).unwrap();
        assert_eq!(plan.async_timeout, Duration::from_secs(2));
    }
}
