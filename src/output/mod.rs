//! Output formatting
//!
//! Table and JSON renderings of run summaries and bisection results.

mod formatter;

pub use formatter::{OutputFormat, ResultFormatter};
