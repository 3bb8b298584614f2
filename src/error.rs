//! Error taxonomy for call test runs
//!
//! Setup failures abort the whole run; every other variant is local to one
//! test case and ends up in that test's report entry.

use thiserror::Error;

use crate::models::CallId;

/// Orchestration errors
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Gateway or tunnel could not start; no call can be connected
    #[error("Setup failure: {0}")]
    SetupFailure(String),

    #[error("No call identifier received within {0} seconds")]
    CallIdTimeout(u64),

    #[error("Call {call_id} did not complete within {secs} seconds")]
    CallCompletionTimeout { call_id: CallId, secs: u64 },

    #[error("Call identifier {0} is already registered")]
    DuplicateCallId(CallId),

    #[error("Unknown call identifier: {0}")]
    UnknownCallId(CallId),

    #[error("Completion signal for call {0} was dropped before resolving")]
    SignalDropped(CallId),

    #[error("Call {call_id} ended with provider status '{status}'")]
    CallFailed { call_id: CallId, status: String },

    #[error("Evaluation failed: {0}")]
    EvaluationFailure(String),

    #[error("Transcript unavailable: {0}")]
    TranscriptUnavailable(String),

    #[error("Telephony provider error: {0}")]
    Telephony(String),

    #[error("Agent API error: {0}")]
    AgentApi(String),

    #[error("Invalid test case: {0}")]
    InvalidTestCase(String),
}

impl HarnessError {
    /// Whether this error aborts the entire run rather than one test case
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, HarnessError::SetupFailure(_))
    }

    /// Whether this error represents the completion wait running out
    pub fn is_completion_timeout(&self) -> bool {
        matches!(self, HarnessError::CallCompletionTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(HarnessError::SetupFailure("tunnel".into()).is_run_fatal());
        assert!(!HarnessError::CallIdTimeout(60).is_run_fatal());

        let timeout = HarnessError::CallCompletionTimeout {
            call_id: CallId::from("CA124"),
            secs: 30,
        };
        assert!(timeout.is_completion_timeout());
        assert_eq!(
            timeout.to_string(),
            "Call CA124 did not complete within 30 seconds"
        );
    }
}
