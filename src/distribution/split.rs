//! Static splitting of the module list
//!
//! Divides the ordered module list into `split` round-robin groups and
//! returns the selected groups' modules. Round-robin balances group sizes
//! within one module of each other regardless of list length, which is why
//! it is used instead of contiguous chunks.

use thiserror::Error;

/// Partition configuration errors; raised before any module runs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("you must specify a `split` value in order to use `partition`")]
    PartitionWithoutSplit,

    #[error("you must specify `partition` values that are less than or equal to your `split` value")]
    PartitionAboveSplit,

    #[error("you must specify `partition` values that are greater than or equal to 1")]
    PartitionBelowOne,
}

/// Validates a split/partition configuration.
///
/// Partition indices are 1-based and must fall inside `[1, split]`; asking
/// for a partition without a split is a configuration error, not a default.
pub fn validate_partitions(split: Option<usize>, partitions: &[usize]) -> Result<(), SplitError> {
    if partitions.is_empty() {
        return Ok(());
    }

    let split = split.ok_or(SplitError::PartitionWithoutSplit)?;

    if partitions.iter().any(|&p| p < 1) {
        return Err(SplitError::PartitionBelowOne);
    }
    if partitions.iter().any(|&p| p > split) {
        return Err(SplitError::PartitionAboveSplit);
    }
    Ok(())
}

/// Returns the modules of the selected partitions.
///
/// Module `i` belongs to partition `i % split + 1`. Selected groups are
/// concatenated group by group, each group keeping the original relative
/// order. An empty selection means every partition; `split < 1` is treated
/// as no split at all.
pub fn split_modules(modules: &[String], split: usize, partitions: &[usize]) -> Vec<String> {
    let split = split.max(1);

    let selected: Vec<usize> = if partitions.is_empty() {
        (1..=split).collect()
    } else {
        partitions.to_vec()
    };

    let mut result = Vec::with_capacity(modules.len());
    for &partition in &selected {
        result.extend(
            modules
                .iter()
                .enumerate()
                .filter(|(index, _)| index % split + 1 == partition)
                .map(|(_, module)| module.clone()),
        );
    }
    result
}
