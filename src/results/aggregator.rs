//! Run report aggregation
//!
//! One [`ReportEntry`] per attempted test case, appended in submission
//! order and written once as a single JSON artifact at the end of a run.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::{CallDirection, CallId, EvaluationResult, Tally, TestStatus};

/// Run-level status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    /// Startup-class failure; no test case could run
    Failed,
}

/// Outcome of one test case
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub test_id: String,
    pub test_name: String,
    /// Scenario prompt the call was driven with
    pub test_description: String,
    pub status: TestStatus,
    pub transcript: String,
    pub evaluations: Vec<EvaluationResult>,
    pub pass_count: usize,
    pub fail_count: usize,
    pub total_evaluations: usize,
    /// Percentage of passing evaluations
    pub pass_rate: f64,
    pub recording_reference: Option<String>,
    pub error: Option<String>,
    pub call_id: Option<CallId>,
    pub direction: CallDirection,
    pub started_at: DateTime<Utc>,
    pub call_requested_at: Option<DateTime<Utc>>,
    pub cleaned_up_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

impl ReportEntry {
    pub fn new(
        test_id: impl Into<String>,
        test_name: impl Into<String>,
        test_description: impl Into<String>,
        direction: CallDirection,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            test_name: test_name.into(),
            test_description: test_description.into(),
            status: TestStatus::Failed,
            transcript: String::new(),
            evaluations: Vec::new(),
            pass_count: 0,
            fail_count: 0,
            total_evaluations: 0,
            pass_rate: 0.0,
            recording_reference: None,
            error: None,
            call_id: None,
            direction,
            started_at: Utc::now(),
            call_requested_at: None,
            cleaned_up_at: None,
            duration_ms: 0,
        }
    }

    /// Replace the evaluations and recompute the tally
    pub fn set_evaluations(&mut self, evaluations: Vec<EvaluationResult>) {
        let tally = Tally::from_evaluations(&evaluations);
        self.pass_count = tally.pass_count;
        self.fail_count = tally.fail_count;
        self.total_evaluations = tally.total();
        self.pass_rate = tally.pass_rate();
        self.evaluations = evaluations;
    }

    pub fn tally(&self) -> Tally {
        Tally {
            pass_count: self.pass_count,
            fail_count: self.fail_count,
        }
    }
}

/// Totals across a run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_tests: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub total_evaluations: usize,
    pub passed_evaluations: usize,
    /// Percentage of passing evaluations across all tests
    pub evaluation_pass_rate: f64,
    pub total_duration_ms: u64,
}

impl RunSummary {
    pub fn from_entries(entries: &[ReportEntry]) -> Self {
        let count = |status: TestStatus| entries.iter().filter(|e| e.status == status).count();
        let tally = entries.iter().fold(Tally::default(), |acc, e| Tally {
            pass_count: acc.pass_count + e.pass_count,
            fail_count: acc.fail_count + e.fail_count,
        });

        Self {
            total_tests: entries.len(),
            completed: count(TestStatus::Completed),
            failed: count(TestStatus::Failed),
            timed_out: count(TestStatus::TimedOut),
            total_evaluations: tally.total(),
            passed_evaluations: tally.pass_count,
            evaluation_pass_rate: tally.pass_rate(),
            total_duration_ms: entries.iter().map(|e| e.duration_ms).sum(),
        }
    }
}

/// Environment the run executed in
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    pub os: String,
    pub arch: String,
    pub tool_version: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Durable artifact of one run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TestRunReport {
    /// Unique run ID
    pub id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub time_limit_secs: u64,
    pub public_url: Option<String>,
    /// Run-level error (setup failures only)
    pub error: Option<String>,
    pub summary: RunSummary,
    pub results: Vec<ReportEntry>,
    pub environment: EnvironmentInfo,
}

impl TestRunReport {
    pub fn new(time_limit_secs: u64) -> Self {
        Self {
            id: generate_run_id(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            time_limit_secs,
            public_url: None,
            error: None,
            summary: RunSummary::default(),
            results: Vec::new(),
            environment: EnvironmentInfo::default(),
        }
    }

    /// Append one test case's outcome
    pub fn record(&mut self, entry: ReportEntry) {
        self.results.push(entry);
        self.summary = RunSummary::from_entries(&self.results);
    }

    pub fn finish(&mut self) {
        if self.status == RunStatus::Running {
            self.status = RunStatus::Completed;
        }
        self.completed_at = Some(Utc::now());
        self.summary = RunSummary::from_entries(&self.results);
    }

    /// Mark the run failed before any test case could run
    pub fn fail_run(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Write as pretty JSON; a `.json` extension is appended if missing
    pub fn save(&self, path: &Path) -> Result<PathBuf> {
        let path = with_json_extension(path);
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let file = File::create(&path)
            .with_context(|| format!("Failed to create report file {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .context("Failed to write report")?;

        info!("Test report saved to {}", path.display());
        Ok(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open report {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file)).context("Failed to parse report")
    }
}

fn with_json_extension(path: &Path) -> PathBuf {
    if path.extension().is_some_and(|e| e == "json") {
        return path.to_path_buf();
    }
    let mut raw = path.as_os_str().to_owned();
    raw.push(".json");
    PathBuf::from(raw)
}

/// Generate unique run ID
pub(crate) fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}


#[cfg(test)]
mod tests {
    use super::fixtures::entry;
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id();
        assert_eq!(id.len(), "20260101_120000_0000".len());
        assert_eq!(&id[8..9], "_");
    }

    #[test]
    fn test_entry_tally() {
        let e = entry(
            "Booking",
            TestStatus::Completed,
            vec![
                EvaluationResult::pass("Greeting", "ok"),
                EvaluationResult::fail("Booking", "no confirmation"),
            ],
        );
        assert_eq!(e.pass_count, 1);
        assert_eq!(e.fail_count, 1);
        assert_eq!(e.total_evaluations, 2);
        assert_eq!(e.pass_rate, 50.0);
    }

    #[test]
    fn test_summary() {
        let mut report = TestRunReport::new(30);
        report.record(entry(
            "Booking",
            TestStatus::Completed,
            vec![EvaluationResult::pass("Greeting", "ok")],
        ));
        report.record(entry("Reschedule", TestStatus::TimedOut, Vec::new()));
        report.finish();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.summary.total_tests, 2);
        assert_eq!(report.summary.completed, 1);
        assert_eq!(report.summary.timed_out, 1);
        assert_eq!(report.summary.evaluation_pass_rate, 100.0);
        assert_eq!(report.summary.total_duration_ms, 3_000);
    }

    #[test]
    fn test_failed_run_stays_failed() {
        let mut report = TestRunReport::new(30);
        report.fail_run("Setup failure: tunnel");
        report.finish();
        assert_eq!(report.status, RunStatus::Failed);
        assert!(report.results.is_empty());
    }

    #[test]
    fn test_save_enforces_json_extension() {
        let dir = tempdir().unwrap();
        let mut report = TestRunReport::new(30);
        report.record(entry("Booking", TestStatus::Completed, Vec::new()));
        report.finish();

        let path = report.save(&dir.path().join("nightly")).unwrap();
        assert_eq!(path, dir.path().join("nightly.json"));

        let kept = report.save(&dir.path().join("out/report.json")).unwrap();
        assert_eq!(kept, dir.path().join("out/report.json"));

        let loaded = TestRunReport::load(&path).unwrap();
        assert_eq!(loaded, report);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["results"][0]["test_name"], "Booking");
        assert_eq!(raw["results"][0]["status"], "completed");
    }
}
