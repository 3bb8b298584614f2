//! Call correlation table
//!
//! Bridges a provider call identifier to the runner task awaiting that
//! call's completion. The runner registers and awaits; gateway handlers
//! resolve. Every access goes through the methods here, which hold the
//! lock only for map bookkeeping and never across an await.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::HarnessError;
use crate::models::CallId;

/// Provider statuses that mean the call ended without a conversation
const FAILED_CALL_STATUSES: &[&str] = &["busy", "failed", "no-answer", "canceled"];

/// Data attached to a call's completion callback
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionPayload {
    /// Provider call status, e.g. `completed` or `busy`
    pub status: Option<String>,
    pub recording_reference: Option<String>,
    pub duration_secs: Option<u64>,
    /// Every other field the provider sent
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl CompletionPayload {
    pub fn completed() -> Self {
        Self {
            status: Some("completed".to_string()),
            ..Default::default()
        }
    }

    pub fn with_recording(mut self, reference: impl Into<String>) -> Self {
        self.recording_reference = Some(reference.into());
        self
    }

    /// Terminal non-success status reported by the provider, if any
    pub fn failure_status(&self) -> Option<&str> {
        self.status
            .as_deref()
            .filter(|s| FAILED_CALL_STATUSES.contains(s))
    }
}

/// Result of a resolve attempt; never an error
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// First resolution for a registered call
    Resolved,
    /// The call was already resolved; ignored
    Duplicate,
    /// No entry for this call id; dropped
    Unknown,
    /// The waiter stopped listening before the payload arrived
    Abandoned,
}

/// Receiver half of a registered call's completion signal
#[derive(Debug)]
pub struct CompletionSignal {
    call_id: CallId,
    receiver: oneshot::Receiver<CompletionPayload>,
}

struct CorrelationEntry {
    sender: Option<oneshot::Sender<CompletionPayload>>,
    registered_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

/// Call id → single-resolution completion signal
#[derive(Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<CallId, CorrelationEntry>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CallId, CorrelationEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a fresh, unresolved signal for `call_id`
    pub fn register(&self, call_id: CallId) -> Result<CompletionSignal, HarnessError> {
        let mut entries = self.entries();
        if entries.contains_key(&call_id) {
            return Err(HarnessError::DuplicateCallId(call_id));
        }

        let (sender, receiver) = oneshot::channel();
        entries.insert(
            call_id.clone(),
            CorrelationEntry {
                sender: Some(sender),
                registered_at: Utc::now(),
                resolved_at: None,
            },
        );
        debug!("Registered correlation entry for call {}", call_id);

        Ok(CompletionSignal { call_id, receiver })
    }

    /// Resolve `call_id` with `payload`; at most one resolution takes effect
    pub fn resolve(&self, call_id: &CallId, payload: CompletionPayload) -> ResolveOutcome {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(call_id) else {
            warn!(
                "{}; dropping completion event",
                HarnessError::UnknownCallId(call_id.clone())
            );
            return ResolveOutcome::Unknown;
        };

        let Some(sender) = entry.sender.take() else {
            warn!(
                "Duplicate completion callback for call {} (first resolved at {:?}); ignoring",
                call_id, entry.resolved_at
            );
            return ResolveOutcome::Duplicate;
        };

        entry.resolved_at = Some(Utc::now());
        let waited_ms = (Utc::now() - entry.registered_at).num_milliseconds();

        if sender.send(payload).is_err() {
            warn!(
                "Completion for call {} arrived after its waiter gave up",
                call_id
            );
            return ResolveOutcome::Abandoned;
        }

        info!("Resolved call {} after {}ms", call_id, waited_ms);
        ResolveOutcome::Resolved
    }

    /// Wait for the signal without blocking other tasks.
    ///
    /// On timeout the entry is removed, so a late callback for this id takes
    /// the unknown-call path instead of touching a future registration.
    pub async fn await_completion(
        &self,
        signal: CompletionSignal,
        timeout: Duration,
    ) -> Result<CompletionPayload, HarnessError> {
        let CompletionSignal { call_id, receiver } = signal;

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => {
                self.release(&call_id);
                Err(HarnessError::SignalDropped(call_id))
            }
            Err(_) => {
                self.release(&call_id);
                Err(HarnessError::CallCompletionTimeout {
                    call_id,
                    secs: timeout.as_secs(),
                })
            }
        }
    }

    /// Remove the entry for `call_id`. Returns whether one existed.
    pub fn release(&self, call_id: &CallId) -> bool {
        let removed = self.entries().remove(call_id).is_some();
        if removed {
            debug!("Released correlation entry for call {}", call_id);
        }
        removed
    }

    #[cfg(test)]
    pub fn contains(&self, call_id: &CallId) -> bool {
        self.entries().contains_key(call_id)
    }

    /// `Some(true)` once resolved, `None` if not registered
    #[cfg(test)]
    pub fn is_resolved(&self, call_id: &CallId) -> Option<bool> {
        self.entries()
            .get(call_id)
            .map(|entry| entry.resolved_at.is_some())
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
