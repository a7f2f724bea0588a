//! testshard - Test Suite Sharding and Replay Coordinator
//!
//! A CLI tool that distributes a test suite's modules across worker
//! processes, records which worker ran what, replays recorded executions
//! exactly, and bisects recorded failures down to a minimal reproducing
//! subset of modules.
//!
//! ## Features
//!
//! - Static round-robin partitioning (`--split` / `--partition`)
//! - Load-balanced dispatch from one shared, cost-weighted queue
//! - Deterministic replay of a recorded execution (`--replay-execution`)
//! - Automated bisection of recorded failures with a results table
//!
//! ## Usage
//!
//! ```bash
//! # Run partition 1 of 3
//! testshard run --module-list modules.txt --split 3 --partition 1 --exec 'cargo test --test {module}'
//!
//! # Load-balance across 4 workers
//! testshard run --module-list modules.txt --load-balance --parallel 4 --exec './run-module.sh {module}'
//!
//! # Replay a recorded execution
//! testshard run --replay-execution test-execution-1700000000000.json --exec './run-module.sh {module}'
//!
//! # Bisect the failure it recorded
//! testshard bisect --replay-execution test-execution-1700000000000.json --path dist --exec './run-module.sh {module}'
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::future::join_all;
use tracing::{info, warn};

mod bisect;
mod channel;
mod cli;
mod config;
mod coordinator;
mod dispatch;
mod distribution;
mod loader;
mod models;
mod output;
mod state;
mod utils;
mod worker;

use bisect::{BisectDriver, SubprocessProbe};
use channel::EventBus;
use config::{EnvConfig, RunMode, RunPlan};
use coordinator::Coordinator;
use distribution::{
    replay_queues, shuffle_modules, split_modules, validate_partitions, weight_modules,
    TimingHistory,
};
use loader::{CommandLoader, DryRunLoader, ModuleLoader};
use models::RunSummary;
use output::{OutputFormat, ResultFormatter};
use state::{ExecutionRecord, ExecutionState};
use utils::LogLevel;
use worker::{WorkerOptions, WorkerRun, WorkerRunner};

/// Artifact directory used when `bisect` has to build one itself.
const BISECT_BUILD_DIR: &str = "bisect-dist";

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    let env = EnvConfig::load();

    let level = if args.verbose || env.verbose.unwrap_or(false) {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    utils::init_logger(level);

    match args.command {
        cli::Command::Run(run_args) => {
            let plan = RunPlan::from_args(&run_args, &env)?;
            let failed = run_suite(plan).await?;
            if failed {
                std::process::exit(1);
            }
        }
        cli::Command::List(list_args) => {
            list_partitions(&list_args)?;
        }
        cli::Command::Bisect(bisect_args) => {
            let reproduced = run_bisect(&bisect_args, &env).await?;
            if !reproduced {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

/// Runs the suite under the plan's distribution mode.
///
/// Returns whether anything failed, which decides the process exit code.
async fn run_suite(plan: RunPlan) -> Result<bool> {
    if let Some(dir) = &plan.artifact {
        if !dir.is_dir() {
            bail!("artifact directory not found at {}", dir.display());
        }
    }

    match plan.mode.clone() {
        RunMode::Static { split, partitions } => run_static(plan, split, partitions).await,
        RunMode::LoadBalance => run_queued(plan).await,
        RunMode::Replay { .. } => run_queued(plan).await,
    }
}

/// Static mode: partitions are assigned up front, one per worker, and no
/// dispatch coordination happens at all.
async fn run_static(plan: RunPlan, split: usize, partitions: Vec<usize>) -> Result<bool> {
    let module_list = plan
        .module_list
        .as_ref()
        .expect("static mode requires a module list");
    let modules = prepare_modules(module_list, plan.filter.as_deref(), plan.seed)?;

    let bus = EventBus::default();
    let loader = make_loader(&plan);
    let workers = plan.workers.unwrap_or(1);

    let mut handles = Vec::new();
    if workers <= 1 {
        let assigned = split_modules(&modules, split, &partitions);
        info!("running {} modules in one worker", assigned.len());
        let runner = WorkerRunner::new(&bus, "1", loader, worker_options(&plan));
        handles.push(tokio::spawn(runner.run_static(assigned)));
    } else {
        for (index, &partition) in partitions.iter().enumerate() {
            let assigned = split_modules(&modules, split, &[partition]);
            info!(
                "worker {} runs partition {partition} ({} modules)",
                index + 1,
                assigned.len()
            );
            let runner = WorkerRunner::new(
                &bus,
                (index + 1).to_string(),
                loader.clone(),
                worker_options(&plan),
            );
            handles.push(tokio::spawn(runner.run_static(assigned)));
        }
    }

    let mut runs = Vec::new();
    for joined in join_all(handles).await {
        runs.push(joined.context("worker task panicked")?);
    }

    let summary = RunSummary::new(runs.into_iter().map(|run| run.summary).collect());
    println!("{}", ResultFormatter::new(plan.format).format_run(&summary));

    Ok(summary.has_failures())
}

/// Queue-driven modes: a coordinator services next-module requests over the
/// event bus while workers pull, execute, and report.
async fn run_queued(plan: RunPlan) -> Result<bool> {
    let bus = EventBus::default();
    let execution = Arc::new(ExecutionState::new());

    let worker_ids: Vec<String> = match &plan.mode {
        RunMode::LoadBalance => {
            let module_list = plan
                .module_list
                .as_ref()
                .expect("load-balance mode requires a module list");
            let modules = prepare_modules(module_list, plan.filter.as_deref(), plan.seed)?;

            let history = TimingHistory::load(&plan.timing_file)?;
            if history.is_empty() {
                info!("no timing history; keeping the module order as-is");
            }
            execution
                .set_shared_queue(weight_modules(modules, &history))
                .context("failed to install the shared queue")?;

            let workers = plan.workers.unwrap_or(1);
            (1..=workers).map(|id| id.to_string()).collect()
        }
        RunMode::Replay {
            file,
            browsers,
            mismatch,
        } => {
            let record = ExecutionRecord::load(file)?;
            let queues = replay_queues(&record, browsers, plan.workers, *mismatch)?;

            let mut ids = Vec::new();
            for (worker, queue) in queues {
                info!("worker {worker} replays {} modules", queue.len());
                execution
                    .set_replay_queue(worker.clone(), queue)
                    .context("failed to install a replay queue")?;
                ids.push(worker);
            }
            ids
        }
        RunMode::Static { .. } => unreachable!("static runs do not use queues"),
    };

    let replaying = matches!(plan.mode, RunMode::Replay { .. });
    let loader = make_loader(&plan);

    let coordinator = Coordinator::new(&bus, execution.clone(), worker_ids.len()).spawn();

    let mut handles = Vec::new();
    for id in &worker_ids {
        let runner = WorkerRunner::new(&bus, id.clone(), loader.clone(), worker_options(&plan));
        handles.push(tokio::spawn(runner.run_pulling()));
    }

    let mut runs: Vec<WorkerRun> = Vec::new();
    for joined in join_all(handles).await {
        match joined.context("worker task panicked")? {
            Ok(run) => runs.push(run),
            Err(e) => {
                coordinator.abort();
                return Err(e);
            }
        }
    }

    let report = coordinator
        .await
        .context("coordinator task panicked")?
        .context("execution state invariant violated")?;

    let abandoned_any = runs.iter().any(|run| run.abandoned);
    let summary = RunSummary::new(runs.into_iter().map(|run| run.summary).collect());
    println!("{}", ResultFormatter::new(plan.format).format_run(&summary));

    // A failing load-balanced run is the one worth replaying later; replay
    // runs already have their record.
    if plan.write_execution_file || (report.any_failed && !replaying) {
        let dir = plan.artifact.clone().unwrap_or_else(|| PathBuf::from("."));
        let path = ExecutionRecord::timestamped_path(&dir);
        report.record.save(&path)?;
    }

    if !replaying && plan.exec.is_some() && !report.module_timings.is_empty() {
        let mut history = TimingHistory::load(&plan.timing_file).unwrap_or_default();
        for (module, duration_ms) in &report.module_timings {
            history.record(module, *duration_ms);
        }
        if let Err(e) = history.save(&plan.timing_file) {
            warn!("failed to update timing history: {e:#}");
        }
    }

    Ok(summary.has_failures() || report.any_failed || abandoned_any)
}

/// Previews how the module list divides into partitions.
fn list_partitions(args: &cli::ListArgs) -> Result<()> {
    validate_partitions(args.split, &args.partition)?;

    let modules = prepare_modules(&args.module_list, args.filter.as_deref(), args.seed)?;
    let split = args.split.unwrap_or(1).max(1);
    let partitions: Vec<usize> = if args.partition.is_empty() {
        (1..=split).collect()
    } else {
        args.partition.clone()
    };

    println!("\nModule partitions (split = {split}, {} modules)\n", modules.len());
    println!("──────────────────────────────────────────────────────────────────────");

    for &partition in &partitions {
        let assigned = split_modules(&modules, split, &[partition]);
        println!("  Partition {partition:2}: {:3} modules", assigned.len());
        if args.detailed {
            for module in assigned {
                println!("      - {module}");
            }
        }
    }

    println!("──────────────────────────────────────────────────────────────────────\n");
    Ok(())
}

/// Bisects a recorded failing execution; returns whether any failure was
/// reproduced.
async fn run_bisect(args: &cli::BisectArgs, env: &EnvConfig) -> Result<bool> {
    let record = ExecutionRecord::load(&args.replay_execution)?;
    if !record.has_failures() {
        println!("No failing tests to bisect.");
        return Ok(true);
    }

    println!(
        "Bisecting failing tests from: {}\n\
         ----------------------------------------------------------------",
        args.replay_execution.display()
    );

    let mut built = false;
    let artifact = match (&args.path, &args.build) {
        (Some(path), _) => Some(path.clone()),
        (None, Some(build_command)) => {
            info!("building app for test bisecting: {build_command}");
            let status = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(build_command)
                .status()
                .await
                .with_context(|| format!("failed to launch build command `{build_command}`"))?;
            if !status.success() {
                bail!("build command `{build_command}` exited with {status}");
            }
            built = true;
            Some(PathBuf::from(BISECT_BUILD_DIR))
        }
        (None, None) => None,
    };

    let exe = std::env::current_exe().context("could not locate the current executable")?;
    let probe = SubprocessProbe::new(exe, artifact, args.exec.clone())?;

    let mut driver = BisectDriver::new(probe, ".");
    if args.no_narrow {
        driver = driver.without_narrowing();
    }

    let result = driver.run(&record).await;

    if built {
        info!("cleaning up test bisecting");
        if let Err(e) = std::fs::remove_dir_all(BISECT_BUILD_DIR) {
            warn!("failed to remove {BISECT_BUILD_DIR}: {e}");
        }
    }

    let report = result?;

    let format_name = args.format.clone().unwrap_or_else(|| env.format_or("table"));
    let format = OutputFormat::from_str(&format_name).unwrap_or(OutputFormat::Table);
    println!("{}", ResultFormatter::new(format).format_bisect(&report));

    Ok(report.reproduced_any)
}

/// Reads, filters, and optionally shuffles the module list.
fn prepare_modules(path: &Path, filter: Option<&str>, seed: Option<u64>) -> Result<Vec<String>> {
    let mut modules = read_module_list(path)?;

    if let Some(filter) = filter {
        let before = modules.len();
        modules.retain(|module| module.contains(filter));
        info!(
            "filter `{filter}` kept {} of {before} modules",
            modules.len()
        );
    }

    if let Some(seed) = seed {
        info!("randomizing module order with seed {seed}");
        modules = shuffle_modules(modules, seed);
    }

    if modules.is_empty() {
        bail!("the module list {} is empty", path.display());
    }
    Ok(modules)
}

/// Reads a module list: a JSON array for `.json` files, otherwise one
/// module name per line.
fn read_module_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read module list {}", path.display()))?;

    if path.extension().map(|e| e == "json").unwrap_or(false) {
        let modules: Vec<String> = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse module list {}", path.display()))?;
        Ok(modules)
    } else {
        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }
}

fn make_loader(plan: &RunPlan) -> Arc<dyn ModuleLoader> {
    match &plan.exec {
        Some(template) => {
            let mut loader = CommandLoader::new(template).with_timeout(plan.module_timeout);
            if let Some(dir) = &plan.artifact {
                loader = loader.with_workdir(dir);
            }
            Arc::new(loader)
        }
        None => {
            info!("no --exec template; modules will be dry-run");
            Arc::new(DryRunLoader::new())
        }
    }
}

fn worker_options(plan: &RunPlan) -> WorkerOptions {
    WorkerOptions {
        async_timeout: plan.async_timeout,
        exit_on_error: plan.exit_on_error,
    }
}
