//! Failure bisection
//!
//! Consumes a persisted execution record with failures and re-runs
//! shrinking module subsets through the whole pipeline as subprocesses,
//! looking for the minimal subset that still reproduces each failure.

mod candidate;
mod driver;

pub use candidate::{candidate_file_name, candidate_record, write_candidate};
pub use driver::{
    BisectDriver, BisectError, BisectReport, BisectRow, ProbeOutcome, ReplayProbe,
    SubprocessProbe,
};
