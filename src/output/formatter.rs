//! Result formatters
//!
//! Renders run summaries and bisection tables for the terminal or as JSON.

#![allow(dead_code)]

use crate::bisect::BisectReport;
use crate::models::RunSummary;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format the summary of a whole run
    pub fn format_run(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Table => self.format_run_table(summary),
        }
    }

    fn format_run_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  Run summary - {:3} workers{:35} ║\n",
            summary.workers.len(),
            ""
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for worker in &summary.workers {
            output.push_str(&format!(
                "║  Worker {:3}  {:>4} modules  {:>4} passed  {:>4} failed{:7} ║\n",
                worker.worker,
                worker.total,
                worker.passed,
                worker.failed + worker.errors,
                ""
            ));
            for outcome in &worker.outcomes {
                let status = if self.colorize {
                    match outcome.is_success() {
                        true => format!("\x1b[32m{}\x1b[0m", outcome.status.symbol()),
                        false => format!("\x1b[31m{}\x1b[0m", outcome.status.symbol()),
                    }
                } else {
                    outcome.status.symbol().to_string()
                };
                output.push_str(&format!(
                    "║    {status} {:<46} [{:>6}ms] ║\n",
                    truncate(&outcome.module, 46),
                    outcome.duration_ms
                ));
            }
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");
        output.push_str(&format!(
            "║  Total: {:<4} Pass: {:<4} Fail: {:<4} Error: {:<4} ({:>5.1}%){:6} ║\n",
            summary.total,
            summary.passed,
            summary.failed,
            summary.errors,
            summary.pass_rate(),
            ""
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");
        output
    }

    /// Format the bisection results table
    pub fn format_bisect(&self, report: &BisectReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Table => self.format_bisect_table(report),
        }
    }

    fn format_bisect_table(&self, report: &BisectReport) -> String {
        const FILE_HEADER: &str = "Test Execution File";
        const REPRO_HEADER: &str = "Failure Reproduced?";

        let file_width = report
            .rows
            .iter()
            .map(|row| row.file.len())
            .chain([FILE_HEADER.len()])
            .max()
            .unwrap_or(FILE_HEADER.len());

        let mut output = String::new();
        output.push_str(&format!(
            "{:<file_width$}  {REPRO_HEADER}  Command\n",
            FILE_HEADER
        ));
        output.push_str(&format!(
            "{}  {}  {}\n",
            "─".repeat(file_width),
            "─".repeat(REPRO_HEADER.len()),
            "─".repeat(40)
        ));

        for row in &report.rows {
            let reproduced = if self.colorize {
                match row.reproduced {
                    true => format!("\x1b[32m{:<19}\x1b[0m", "true"),
                    false => format!("\x1b[31m{:<19}\x1b[0m", "false"),
                }
            } else {
                format!("{:<19}", row.reproduced)
            };
            output.push_str(&format!(
                "{:<file_width$}  {reproduced}  {}\n",
                row.file, row.command
            ));
        }

        for (worker, modules) in &report.minimal {
            output.push_str(&format!(
                "\nWorker {worker}: minimal reproducing subset ({} modules): {}\n",
                modules.len(),
                modules.join(", ")
            ));
        }

        if !report.reproduced_any {
            output.push_str("\nNo failure was reproduced.\n");
        }

        output
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bisect::BisectRow;
    use crate::models::{ModuleOutcome, WorkerSummary};

    #[test]
    fn test_output_format_parsing() {
        assert_eq!(OutputFormat::from_str("table"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("JSON"), Some(OutputFormat::Json));
        assert!(OutputFormat::from_str("yaml").is_none());
    }

    #[test]
    fn test_run_table_contains_workers_and_totals() {
        let summary = RunSummary::new(vec![WorkerSummary::new(
            "1",
            vec![
                ModuleOutcome::pass("tests/unit/a", 10),
                ModuleOutcome::fail("tests/unit/b", 5, "boom"),
            ],
        )]);

        let table = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_run(&summary);

        assert!(table.contains("Worker 1"));
        assert!(table.contains("tests/unit/a"));
        assert!(table.contains("Total: 2"));
    }

    #[test]
    fn test_bisect_table_has_row_per_probe() {
        let report = BisectReport {
            rows: vec![
                BisectRow {
                    file: "te-2.json".to_string(),
                    reproduced: true,
                    command: "testshard run --replay-execution te-2.json".to_string(),
                },
                BisectRow {
                    file: "te-2.1.json".to_string(),
                    reproduced: false,
                    command: "testshard run --replay-execution te-2.1.json".to_string(),
                },
            ],
            minimal: std::collections::BTreeMap::from([(
                "2".to_string(),
                vec!["m3".to_string()],
            )]),
            reproduced_any: true,
        };

        let table = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_bisect(&report);

        assert!(table.contains("Test Execution File"));
        assert!(table.contains("te-2.json"));
        assert!(table.contains("te-2.1.json"));
        assert!(table.contains("minimal reproducing subset"));
    }

    #[test]
    fn test_json_output_is_parseable() {
        let summary = RunSummary::new(vec![WorkerSummary::new(
            "1",
            vec![ModuleOutcome::pass("a", 1)],
        )]);

        let json = ResultFormatter::new(OutputFormat::Json).format_run(&summary);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total"], 1);
    }
}
