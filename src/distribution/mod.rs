//! Module distribution algorithms
//!
//! Pure, deterministic functions that turn the full ordered module list
//! into static partitions, a weight-sorted shared queue, or exact replay
//! queues.

mod replay;
mod split;
mod weight;

pub use replay::{replay_queues, MismatchPolicy, ReplayError};
pub use split::{split_modules, validate_partitions, SplitError};
pub use weight::{weight_modules, TimingHistory};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Shuffles the module list with a seeded generator.
///
/// The same seed always produces the same order, so a randomized run can be
/// reported and reproduced by its seed alone.
pub fn shuffle_modules(mut modules: Vec<String>, seed: u64) -> Vec<String> {
    let mut rng = StdRng::seed_from_u64(seed);
    modules.shuffle(&mut rng);
    modules
}
