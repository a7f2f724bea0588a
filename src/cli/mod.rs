//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Test suite sharding, replay and bisection coordinator
#[derive(Parser, Debug)]
#[command(name = "testshard")]
#[command(version)]
#[command(about = "Distribute test modules across workers, replay and bisect failures")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the test suite across workers
    Run(RunArgs),

    /// Preview how the module list splits into partitions
    List(ListArgs),

    /// Bisect a recorded failing execution to a minimal subset
    Bisect(BisectArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// File with the ordered module list (JSON array or one name per line)
    #[arg(short, long)]
    pub module_list: Option<PathBuf>,

    /// Number of partitions to split the module list into
    #[arg(long)]
    pub split: Option<usize>,

    /// Partition(s) to run, 1-based (repeatable)
    #[arg(long)]
    pub partition: Vec<usize>,

    /// Number of workers to coordinate (default 1; replay defaults to the
    /// recorded worker set)
    #[arg(short, long)]
    pub parallel: Option<usize>,

    /// Dispatch modules from one shared queue, fastest worker first
    #[arg(long)]
    pub load_balance: bool,

    /// Shuffle the module list with this seed before distributing
    #[arg(long)]
    pub seed: Option<u64>,

    /// Keep only module names containing this substring
    #[arg(long)]
    pub filter: Option<String>,

    /// Replay a recorded execution from this JSON file
    #[arg(long)]
    pub replay_execution: Option<PathBuf>,

    /// Worker id(s) to replay from the record (repeatable; default all)
    #[arg(long)]
    pub replay_browser: Vec<String>,

    /// Policy when the worker count differs from the record
    /// (error, redistribute)
    #[arg(long, default_value = "error")]
    pub on_worker_mismatch: String,

    /// Directory with a pre-built artifact to run modules in
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Command template executed per module; {module} is substituted
    #[arg(long)]
    pub exec: Option<String>,

    /// Seconds to wait for a dispatch response before retrying (default 5)
    #[arg(long)]
    pub async_timeout: Option<u64>,

    /// Seconds before a running module is killed (default 300)
    #[arg(long)]
    pub module_timeout: Option<u64>,

    /// Abort the whole run when a worker exhausts its dispatch retries
    #[arg(long)]
    pub exit_on_error: bool,

    /// Always write the execution record, even on success
    #[arg(long)]
    pub write_execution_file: bool,

    /// Timing history file used to weight the load-balanced queue
    #[arg(long)]
    pub timing_file: Option<PathBuf>,

    /// Output format (table, json)
    #[arg(short, long)]
    pub format: Option<String>,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// File with the ordered module list (JSON array or one name per line)
    #[arg(short, long)]
    pub module_list: PathBuf,

    /// Number of partitions to split the module list into
    #[arg(long)]
    pub split: Option<usize>,

    /// Partition(s) to preview, 1-based (repeatable)
    #[arg(long)]
    pub partition: Vec<usize>,

    /// Shuffle the module list with this seed before splitting
    #[arg(long)]
    pub seed: Option<u64>,

    /// Keep only module names containing this substring
    #[arg(long)]
    pub filter: Option<String>,

    /// Show every module in each partition
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for bisect command
#[derive(Parser, Debug)]
pub struct BisectArgs {
    /// The recorded execution to bisect
    #[arg(long)]
    pub replay_execution: PathBuf,

    /// Directory with a pre-built artifact to run iterations against
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Build command producing the artifact when no --path is given
    #[arg(long)]
    pub build: Option<String>,

    /// Command template executed per module; {module} is substituted
    #[arg(long)]
    pub exec: Option<String>,

    /// Only replay the full failing sequences, skip the narrowing search
    #[arg(long)]
    pub no_narrow: bool,

    /// Output format (table, json)
    #[arg(short, long)]
    pub format: Option<String>,
}
