//! Human-readable report rendering
//!
//! Renders a stored [`TestRunReport`] as plain text or Markdown.

use std::fmt::{self, Write};

use chrono::{DateTime, Utc};

use super::aggregator::{ReportEntry, TestRunReport};

/// Report output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReportFormat {
    Text,
    Markdown,
}

impl ReportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "text" | "txt" => Some(ReportFormat::Text),
            "markdown" | "md" => Some(ReportFormat::Markdown),
            _ => None,
        }
    }
}

/// Report generator
pub struct ReportGenerator;

impl ReportGenerator {
    pub fn render(report: &TestRunReport, format: ReportFormat) -> String {
        let mut output = String::new();
        let written = match format {
            ReportFormat::Text => write_text(&mut output, report),
            ReportFormat::Markdown => write_markdown(&mut output, report),
        };
        debug_assert!(written.is_ok());
        output
    }
}

fn write_text(out: &mut String, report: &TestRunReport) -> fmt::Result {
    let summary = &report.summary;

    writeln!(out, "\n{:=^70}", " Call Test Report ")?;
    writeln!(out)?;
    writeln!(out, "Run ID: {}", report.id)?;
    writeln!(out, "Status: {:?}", report.status)?;
    writeln!(out, "Started: {}", format_datetime(&report.started_at))?;
    if let Some(completed) = &report.completed_at {
        writeln!(out, "Completed: {}", format_datetime(completed))?;
    }
    writeln!(out, "Time limit: {}s", report.time_limit_secs)?;
    if let Some(error) = &report.error {
        writeln!(out, "Error: {error}")?;
    }
    writeln!(out)?;

    writeln!(out, "{:-^70}", " Summary ")?;
    writeln!(
        out,
        "Tests: {} total, {} completed, {} failed, {} timed out",
        summary.total_tests, summary.completed, summary.failed, summary.timed_out
    )?;
    writeln!(
        out,
        "Evaluations: {}/{} passed ({:.1}%)",
        summary.passed_evaluations, summary.total_evaluations, summary.evaluation_pass_rate
    )?;
    writeln!(out, "Total duration: {}ms", summary.total_duration_ms)?;

    writeln!(out, "\n{:-^70}", " Test Cases ")?;
    writeln!(
        out,
        "{:<30} {:<10} {:>6} {:>8} {:>10}",
        "Test", "Status", "Pass", "Rate", "Time(ms)"
    )?;
    writeln!(out, "{:-<70}", "")?;
    for entry in &report.results {
        writeln!(
            out,
            "{:<30} {:<10} {:>6} {:>7.1}% {:>10}",
            truncate(&entry.test_name, 30),
            entry.status.as_str(),
            format!("{}/{}", entry.pass_count, entry.total_evaluations),
            entry.pass_rate,
            entry.duration_ms
        )?;
    }

    for entry in &report.results {
        write_text_entry(out, entry)?;
    }

    writeln!(out, "\n{:=^70}", "")
}

fn write_text_entry(out: &mut String, entry: &ReportEntry) -> fmt::Result {
    writeln!(out, "\n{} {}", entry.status.symbol(), entry.test_name)?;
    writeln!(out, "  Scenario: {}", entry.test_description)?;
    if let Some(call_id) = &entry.call_id {
        writeln!(out, "  Call: {} ({})", call_id, entry.direction)?;
    }
    if let Some(recording) = &entry.recording_reference {
        writeln!(out, "  Recording: {recording}")?;
    }
    if let Some(error) = &entry.error {
        writeln!(out, "  Error: {error}")?;
    }
    for evaluation in &entry.evaluations {
        writeln!(
            out,
            "  {} {}: {}",
            evaluation.verdict.symbol(),
            evaluation.name,
            evaluation.reason
        )?;
    }
    Ok(())
}

fn write_markdown(out: &mut String, report: &TestRunReport) -> fmt::Result {
    let summary = &report.summary;

    writeln!(out, "# Call Test Report\n")?;
    writeln!(out, "## Summary\n")?;
    writeln!(out, "| Property | Value |")?;
    writeln!(out, "|----------|-------|")?;
    writeln!(out, "| Run ID | `{}` |", report.id)?;
    writeln!(out, "| Status | {:?} |", report.status)?;
    writeln!(out, "| Started | {} |", format_datetime(&report.started_at))?;
    writeln!(out, "| Tests | {} |", summary.total_tests)?;
    writeln!(out, "| Completed | {} |", summary.completed)?;
    writeln!(out, "| Failed | {} |", summary.failed)?;
    writeln!(out, "| Timed out | {} |", summary.timed_out)?;
    writeln!(
        out,
        "| Evaluation pass rate | {:.1}% |",
        summary.evaluation_pass_rate
    )?;
    if let Some(error) = &report.error {
        writeln!(out, "| Error | {error} |")?;
    }

    writeln!(out, "\n## Test Cases\n")?;
    for entry in &report.results {
        writeln!(out, "### {} {}\n", entry.status.symbol(), entry.test_name)?;
        writeln!(out, "- **Status:** {}", entry.status.as_str())?;
        writeln!(out, "- **Scenario:** {}", entry.test_description)?;
        writeln!(
            out,
            "- **Evaluations:** {}/{} passed ({:.1}%)",
            entry.pass_count, entry.total_evaluations, entry.pass_rate
        )?;
        if let Some(recording) = &entry.recording_reference {
            writeln!(out, "- **Recording:** {recording}")?;
        }
        if let Some(error) = &entry.error {
            writeln!(out, "- **Error:** {error}")?;
        }

        if !entry.evaluations.is_empty() {
            writeln!(out, "\n| Metric | Result | Reason |")?;
            writeln!(out, "|--------|--------|--------|")?;
            for evaluation in &entry.evaluations {
                writeln!(
                    out,
                    "| {} | {} | {} |",
                    evaluation.name, evaluation.verdict, evaluation.reason
                )?;
            }
        }

        if !entry.transcript.is_empty() {
            writeln!(out, "\n<details><summary>Transcript</summary>\n")?;
            writeln!(out, "```text\n{}\n```", entry.transcript)?;
            writeln!(out, "\n</details>")?;
        }
        writeln!(out)?;
    }

    Ok(())
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvaluationResult, TestStatus};
    use crate::results::aggregator::fixtures::entry;

    fn sample() -> TestRunReport {
        let mut report = TestRunReport::new(30);
        let mut booking = entry(
            "Booking",
            TestStatus::Completed,
            vec![
                EvaluationResult::pass("Greeting", "Greeted the caller"),
                EvaluationResult::fail("Confirmation", "Never confirmed the time"),
            ],
        );
        booking.recording_reference = Some("r1.wav".to_string());
        booking.transcript = "assistant: Hello\nuser: Table for two".to_string();
        report.record(booking);

        let mut reschedule = entry("Reschedule", TestStatus::TimedOut, Vec::new());
        reschedule.error = Some("Call CA124 did not complete within 30 seconds".to_string());
        report.record(reschedule);
        report.finish();
        report
    }

    #[test]
    fn test_report_format() {
        assert_eq!(ReportFormat::from_str("text"), Some(ReportFormat::Text));
        assert_eq!(ReportFormat::from_str("md"), Some(ReportFormat::Markdown));
        assert!(ReportFormat::from_str("html").is_none());
    }

    #[test]
    fn test_text_report() {
        let text = ReportGenerator::render(&sample(), ReportFormat::Text);
        assert!(text.contains("Call Test Report"));
        assert!(text.contains("Tests: 2 total, 1 completed, 0 failed, 1 timed out"));
        assert!(text.contains("Recording: r1.wav"));
        assert!(text.contains("✗ Confirmation: Never confirmed the time"));
        assert!(text.contains("did not complete within 30 seconds"));
    }

    #[test]
    fn test_markdown_report() {
        let md = ReportGenerator::render(&sample(), ReportFormat::Markdown);
        assert!(md.starts_with("# Call Test Report"));
        assert!(md.contains("| Greeting | pass | Greeted the caller |"));
        assert!(md.contains("```text\nassistant: Hello\nuser: Table for two\n```"));
        assert!(md.contains("- **Status:** timed_out"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
    }
}
