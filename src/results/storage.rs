//! Report storage and retrieval
//!
//! Keeps one pretty-printed JSON file per run under a base directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::aggregator::{RunStatus, TestRunReport};

/// Report store rooted at one directory
pub struct ReportStore {
    base_dir: PathBuf,
}

impl ReportStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// `<data_dir>/call-probe/reports`
    pub fn default_dir() -> Self {
        let base_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("call-probe")
            .join("reports");
        Self::new(base_dir)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.base_dir.join(format!("{run_id}.json"))
    }

    /// Save a report under its run id
    pub fn save(&self, report: &TestRunReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to create {}", self.base_dir.display()))?;
        report.save(&self.run_path(&report.id))
    }

    pub fn load(&self, run_id: &str) -> Result<TestRunReport> {
        let report = TestRunReport::load(&self.run_path(run_id))?;
        debug!("Loaded report {}", run_id);
        Ok(report)
    }

    /// Brief info for every stored run, newest first
    pub fn list_runs(&self) -> Result<Vec<RunInfo>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runs = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            if path.extension().map(|e| e == "json").unwrap_or(false) {
                match TestRunReport::load(&path) {
                    Ok(report) => runs.push(RunInfo::from(&report)),
                    Err(e) => debug!("Skipping {}: {}", path.display(), e),
                }
            }
        }

        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(runs)
    }

    /// Most recent run, if any
    pub fn latest(&self) -> Result<Option<TestRunReport>> {
        match self.list_runs()?.first() {
            Some(info) => self.load(&info.id).map(Some),
            None => Ok(None),
        }
    }

    pub fn delete(&self, run_id: &str) -> Result<()> {
        let path = self.run_path(run_id);
        if path.exists() {
            fs::remove_file(&path)?;
            info!("Deleted report: {}", path.display());
        }
        Ok(())
    }

    /// Export a report to `path`
    pub fn export(&self, report: &TestRunReport, path: &Path, format: ExportFormat) -> Result<()> {
        match format {
            ExportFormat::Json => {
                let file = File::create(path)?;
                serde_json::to_writer_pretty(BufWriter::new(file), report)?;
            }
            ExportFormat::Csv => {
                let mut writer = csv::Writer::from_path(path)?;

                writer.write_record([
                    "test_id",
                    "test_name",
                    "status",
                    "call_id",
                    "pass_count",
                    "fail_count",
                    "pass_rate",
                    "duration_ms",
                    "recording_reference",
                    "error",
                ])?;

                for entry in &report.results {
                    writer.write_record([
                        entry.test_id.clone(),
                        entry.test_name.clone(),
                        entry.status.as_str().to_string(),
                        entry
                            .call_id
                            .as_ref()
                            .map(|c| c.to_string())
                            .unwrap_or_default(),
                        entry.pass_count.to_string(),
                        entry.fail_count.to_string(),
                        format!("{:.1}", entry.pass_rate),
                        entry.duration_ms.to_string(),
                        entry.recording_reference.clone().unwrap_or_default(),
                        entry.error.clone().unwrap_or_default(),
                    ])?;
                }
                writer.flush()?;
            }
        }

        info!("Exported report to {}", path.display());
        Ok(())
    }
}

/// Brief run information
#[derive(Clone, Debug)]
pub struct RunInfo {
    pub id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub total_tests: usize,
    pub completed: usize,
    pub evaluation_pass_rate: f64,
}

impl From<&TestRunReport> for RunInfo {
    fn from(report: &TestRunReport) -> Self {
        Self {
            id: report.id.clone(),
            status: report.status,
            started_at: report.started_at,
            total_tests: report.summary.total_tests,
            completed: report.summary.completed,
            evaluation_pass_rate: report.summary.evaluation_pass_rate,
        }
    }
}

/// Export format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn from_extension(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EvaluationResult, TestStatus};
    use crate::results::aggregator::fixtures::entry;
    use chrono::Duration;
    use tempfile::tempdir;

    fn report(minutes_ago: i64) -> TestRunReport {
        let mut report = TestRunReport::new(30);
        report.started_at = Utc::now() - Duration::minutes(minutes_ago);
        report.id = format!("run_{minutes_ago}");
        report.record(entry(
            "Booking",
            TestStatus::Completed,
            vec![EvaluationResult::pass("Greeting", "ok")],
        ));
        report.finish();
        report
    }

    #[test]
    fn test_save_list_load() {
        let dir = tempdir().unwrap();
        let store = ReportStore::new(dir.path());

        store.save(&report(10)).unwrap();
        store.save(&report(1)).unwrap();
        fs::write(dir.path().join("garbage.json"), "{").unwrap();

        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, "run_1");
        assert_eq!(runs[0].total_tests, 1);

        let latest = store.latest().unwrap().unwrap();
        assert_eq!(latest.id, "run_1");

        store.delete("run_1").unwrap();
        assert_eq!(store.list_runs().unwrap().len(), 1);
    }

    #[test]
    fn test_empty_store() {
        let dir = tempdir().unwrap();
        let store = ReportStore::new(dir.path().join("missing"));
        assert!(store.list_runs().unwrap().is_empty());
        assert!(store.latest().unwrap().is_none());
    }

    #[test]
    fn test_export_csv() {
        let dir = tempdir().unwrap();
        let store = ReportStore::new(dir.path());
        let path = dir.path().join("export.csv");

        store.export(&report(0), &path, ExportFormat::Csv).unwrap();

        let content = fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert!(lines.next().unwrap().starts_with("test_id,test_name,status"));
        assert!(lines.next().unwrap().starts_with("booking,Booking,completed"));
    }

    #[test]
    fn test_export_format() {
        assert_eq!(ExportFormat::from_str("JSON"), Some(ExportFormat::Json));
        assert_eq!(
            ExportFormat::from_extension(Path::new("out.csv")),
            Some(ExportFormat::Csv)
        );
        assert!(ExportFormat::from_str("xml").is_none());
    }
}
