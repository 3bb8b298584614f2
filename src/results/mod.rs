//! Run report aggregation, storage and rendering

mod aggregator;
mod report;
mod storage;

pub use aggregator::{EnvironmentInfo, ReportEntry, RunStatus, RunSummary, TestRunReport};
pub use report::{ReportFormat, ReportGenerator};
pub use storage::{ExportFormat, ReportStore, RunInfo};

#[cfg(test)]
pub(crate) use aggregator::fixtures;
