//! Output formatting module
//!
//! Console renderings of run results.

mod formatter;

pub use formatter::{write_report_to_file, OutputFormat, ResultFormatter};
