//! Call session and lifecycle models
//!
//! Defines provider call identifiers, call direction, and the per-test
//! call lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque call identifier assigned by the telephony provider
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Who originates the call under test
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallDirection {
    /// The provider dials the agent's number; the call id is known immediately
    #[default]
    TesterInitiated,
    /// The agent's own API originates the call; the call id arrives via webhook
    AgentInitiated,
}

impl CallDirection {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "tester_initiated" | "tester" | "inbound" => Some(CallDirection::TesterInitiated),
            "agent_initiated" | "agent" | "outbound" => Some(CallDirection::AgentInitiated),
            _ => None,
        }
    }
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::TesterInitiated => write!(f, "tester-initiated"),
            CallDirection::AgentInitiated => write!(f, "agent-initiated"),
        }
    }
}

/// Status of a single provider call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    Initiating,
    Connected,
    Completed,
    Failed,
    TimedOut,
}

impl CallStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Completed | CallStatus::Failed | CallStatus::TimedOut
        )
    }
}

/// One provider call, from request until its result is folded into the report
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallSession {
    pub call_id: CallId,
    pub direction: CallDirection,
    pub status: CallStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CallSession {
    pub fn new(call_id: CallId, direction: CallDirection) -> Self {
        Self {
            call_id,
            direction,
            status: CallStatus::Initiating,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn connect(&mut self) {
        if self.status == CallStatus::Initiating {
            self.status = CallStatus::Connected;
        }
    }

    /// Move to a terminal status; later calls are ignored
    pub fn finish(&mut self, status: CallStatus) {
        if self.status.is_terminal() || !status.is_terminal() {
            return;
        }
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}

/// Per-test-case lifecycle phase
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallPhase {
    Pending,
    CallRequested,
    CallConnected,
    Completed,
    Failed,
    TimedOut,
}

impl CallPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallPhase::Completed | CallPhase::Failed | CallPhase::TimedOut
        )
    }

    /// Allowed transitions of the lifecycle state machine
    pub fn can_advance_to(&self, next: CallPhase) -> bool {
        match (self, next) {
            (CallPhase::Pending, CallPhase::CallRequested) => true,
            (CallPhase::CallRequested, CallPhase::CallConnected) => true,
            (CallPhase::CallConnected, CallPhase::Completed) => true,
            (CallPhase::CallConnected, CallPhase::TimedOut) => true,
            (from, CallPhase::Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for CallPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallPhase::Pending => "PENDING",
            CallPhase::CallRequested => "CALL_REQUESTED",
            CallPhase::CallConnected => "CALL_CONNECTED",
            CallPhase::Completed => "COMPLETED",
            CallPhase::Failed => "FAILED",
            CallPhase::TimedOut => "TIMED_OUT",
        };
        f.write_str(name)
    }
}

/// Timestamped lifecycle of one test case's call
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CallLifecycle {
    phase: CallPhase,
    transitions: Vec<PhaseTransition>,
}

/// A recorded phase change
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub phase: CallPhase,
    pub at: DateTime<Utc>,
}

impl CallLifecycle {
    pub fn new() -> Self {
        Self {
            phase: CallPhase::Pending,
            transitions: vec![PhaseTransition {
                phase: CallPhase::Pending,
                at: Utc::now(),
            }],
        }
    }

    pub fn phase(&self) -> CallPhase {
        self.phase
    }

    /// Advance to `next`, rejecting transitions the state machine forbids
    pub fn advance(&mut self, next: CallPhase) -> Result<(), InvalidTransition> {
        if !self.phase.can_advance_to(next) {
            return Err(InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        self.phase = next;
        self.transitions.push(PhaseTransition {
            phase: next,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Timestamp at which `phase` was entered
    pub fn entered_at(&self, phase: CallPhase) -> Option<DateTime<Utc>> {
        self.transitions
            .iter()
            .find(|t| t.phase == phase)
            .map(|t| t.at)
    }
}

impl Default for CallLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Rejected lifecycle transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("Invalid call lifecycle transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: CallPhase,
    pub to: CallPhase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_happy_path() {
        let mut lifecycle = CallLifecycle::new();
        lifecycle.advance(CallPhase::CallRequested).unwrap();
        lifecycle.advance(CallPhase::CallConnected).unwrap();
        lifecycle.advance(CallPhase::Completed).unwrap();

        assert_eq!(lifecycle.phase(), CallPhase::Completed);
        assert_eq!(lifecycle.transitions.len(), 4);
        assert!(lifecycle.entered_at(CallPhase::CallRequested).is_some());
    }

    #[test]
    fn test_lifecycle_rejects_skips() {
        let mut lifecycle = CallLifecycle::new();
        let err = lifecycle.advance(CallPhase::Completed).unwrap_err();
        assert_eq!(err.from, CallPhase::Pending);

        lifecycle.advance(CallPhase::CallRequested).unwrap();
        assert!(lifecycle.advance(CallPhase::TimedOut).is_err());
    }

    #[test]
    fn test_failed_from_any_live_phase() {
        for phase in [
            CallPhase::Pending,
            CallPhase::CallRequested,
            CallPhase::CallConnected,
        ] {
            assert!(phase.can_advance_to(CallPhase::Failed));
        }
        assert!(!CallPhase::Completed.can_advance_to(CallPhase::Failed));
        assert!(!CallPhase::TimedOut.can_advance_to(CallPhase::Failed));
    }

    #[test]
    fn test_call_session_finish_once() {
        let mut session = CallSession::new(CallId::from("CA1"), CallDirection::TesterInitiated);
        session.connect();
        assert_eq!(session.status, CallStatus::Connected);

        session.finish(CallStatus::TimedOut);
        session.finish(CallStatus::Completed);
        assert_eq!(session.status, CallStatus::TimedOut);
        assert!(session.ended_at.is_some());
    }

    #[test]
    fn test_direction_from_str() {
        assert_eq!(
            CallDirection::from_str("agent-initiated"),
            Some(CallDirection::AgentInitiated)
        );
        assert_eq!(
            CallDirection::from_str("INBOUND"),
            Some(CallDirection::TesterInitiated)
        );
        assert_eq!(CallDirection::from_str("sideways"), None);
    }
}
