//! Console formatters for run results
//!
//! Provides table, JSON, CSV and one-line summary renderings.

use std::io::Write;

use crate::models::TestStatus;
use crate::results::{ReportEntry, RunStatus, TestRunReport};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
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

    /// Format a single test case outcome
    pub fn format_entry(&self, entry: &ReportEntry) -> String {
        match self.format {
            OutputFormat::Table => self.format_entry_table(entry),
            OutputFormat::Json => serde_json::to_string(entry).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(entry).unwrap_or_default(),
            OutputFormat::Csv => self.format_entry_csv(entry),
            OutputFormat::Summary => self.format_entry_summary(entry),
        }
    }

    fn status_label(&self, status: TestStatus) -> String {
        let plain = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return plain;
        }
        match status {
            TestStatus::Completed => format!("\x1b[32m{plain}\x1b[0m"),
            TestStatus::Failed => format!("\x1b[31m{plain}\x1b[0m"),
            TestStatus::TimedOut => format!("\x1b[33m{plain}\x1b[0m"),
        }
    }

    fn format_entry_table(&self, entry: &ReportEntry) -> String {
        format!(
            "{:28} {:12} {:>3}/{:<3} [{:>7}ms]",
            entry.test_name,
            self.status_label(entry.status),
            entry.pass_count,
            entry.total_evaluations,
            entry.duration_ms
        )
    }

    fn format_entry_csv(&self, entry: &ReportEntry) -> String {
        format!(
            "{},{},{},{},{},{},\"{}\"",
            entry.test_id,
            entry.test_name,
            entry.status.as_str(),
            entry.pass_count,
            entry.total_evaluations,
            entry.duration_ms,
            entry.error.as_deref().unwrap_or("").replace('"', "\"\"")
        )
    }

    fn format_entry_summary(&self, entry: &ReportEntry) -> String {
        format!(
            "{} {} ({}ms)",
            entry.status.symbol(),
            entry.test_name,
            entry.duration_ms
        )
    }

    /// Format a whole run
    pub fn format_report(&self, report: &TestRunReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_report_table(report),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Csv => self.format_report_csv(report),
            OutputFormat::Summary => self.format_report_brief(report),
        }
    }

    fn format_report_table(&self, report: &TestRunReport) -> String {
        let summary = &report.summary;
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!("║  Run {:56} ║\n", report.id));
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        for entry in &report.results {
            output.push_str(&format!("║  {}\n", self.format_entry_table(entry)));
            if let Some(error) = &entry.error {
                output.push_str(&format!("║      {error}\n"));
            }
        }

        if let Some(error) = &report.error {
            output.push_str(&format!("║  Run failed: {error}\n"));
        }

        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let completed = if self.colorize {
            format!("\x1b[32m{}\x1b[0m", summary.completed)
        } else {
            summary.completed.to_string()
        };
        let failed = if self.colorize && summary.failed + summary.timed_out > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed)
        } else {
            summary.failed.to_string()
        };

        output.push_str(&format!(
            "║  Tests: {:2} | Completed: {} | Failed: {} | Timed out: {:2}\n",
            summary.total_tests, completed, failed, summary.timed_out
        ));
        output.push_str(&format!(
            "║  Evaluations: {}/{} passed ({:5.1}%) | Duration: {}ms\n",
            summary.passed_evaluations,
            summary.total_evaluations,
            summary.evaluation_pass_rate,
            summary.total_duration_ms
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }

    fn format_report_csv(&self, report: &TestRunReport) -> String {
        let mut output = String::new();
        output.push_str("test_id,test_name,status,passed,total,duration_ms,error\n");
        for entry in &report.results {
            output.push_str(&self.format_entry_csv(entry));
            output.push('\n');
        }
        output
    }

    fn format_report_brief(&self, report: &TestRunReport) -> String {
        let summary = &report.summary;
        let status = match report.status {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        format!(
            "Run {} {}: {}/{} tests completed, {}/{} evaluations passed ({:.1}%) in {}ms",
            report.id,
            status,
            summary.completed,
            summary.total_tests,
            summary.passed_evaluations,
            summary.total_evaluations,
            summary.evaluation_pass_rate,
            summary.total_duration_ms
        )
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write a formatted run to a file
pub fn write_report_to_file(
    path: &str,
    report: &TestRunReport,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = ResultFormatter::new(format).no_color();
    let content = formatter.format_report(report);

    let mut file = std::fs::File::create(path)?;
    file.write_all(content.as_bytes())?;

    Ok(())
}
