//! Data models for call testing
//!
//! This module contains the data structures shared across the runner,
//! gateway and report.

mod call;
mod test_case;
mod test_result;

pub use call::{
    CallDirection, CallId, CallLifecycle, CallPhase, CallSession, CallStatus,
};
pub use test_case::{Metric, Scenario, TestCase, UserPersona};
pub use test_result::{EvaluationResult, Tally, TestStatus, Verdict};

#[cfg(test)]
pub(crate) use test_case::fixtures;
