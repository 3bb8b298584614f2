//! Recording references delivered after a call ends
//!
//! The provider finishes a recording a few seconds after the call's status
//! callback, and reports it on a separate webhook. The gateway files each
//! reference here by call; the runner waits for its call's entry when the
//! completion payload carried none.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

use crate::models::CallId;

#[derive(Default)]
pub struct RecordingLedger {
    references: Mutex<HashMap<CallId, String>>,
    filed: Notify,
}

impl RecordingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn references(&self) -> MutexGuard<'_, HashMap<CallId, String>> {
        self.references.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// File the recording for `call_id`; a later report replaces an earlier one
    pub fn record(&self, call_id: CallId, reference: impl Into<String>) {
        let reference = reference.into();
        debug!("Recording for call {}: {}", call_id, reference);
        self.references().insert(call_id, reference);
        self.filed.notify_waiters();
    }

    pub fn get(&self, call_id: &CallId) -> Option<String> {
        self.references().get(call_id).cloned()
    }

    /// Wait up to `timeout` for `call_id`'s recording to be filed
    pub async fn wait_for(&self, call_id: &CallId, timeout: Duration) -> Option<String> {
        let wait = async {
            loop {
                // Registered before the lookup so a record in between still wakes us
                let filed = self.filed.notified();
                if let Some(reference) = self.get(call_id) {
                    return reference;
                }
                filed.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.ok()
    }

    /// Drop `call_id`'s entry once its test case is done
    pub fn forget(&self, call_id: &CallId) -> Option<String> {
        self.references().remove(call_id)
    }

    pub fn len(&self) -> usize {
        self.references().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_wait_for_recording_filed_later() {
        let ledger = Arc::new(RecordingLedger::new());
        let call_id = CallId::from("CA1");

        let filer = Arc::clone(&ledger);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            filer.record(CallId::from("CA0"), "other.wav");
            tokio::time::sleep(Duration::from_millis(50)).await;
            filer.record(CallId::from("CA1"), "RE1");
        });

        let reference = ledger.wait_for(&call_id, Duration::from_secs(2)).await;
        assert_eq!(reference.as_deref(), Some("RE1"));
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let ledger = RecordingLedger::new();
        ledger.record(CallId::from("CA0"), "other.wav");
        let reference = ledger
            .wait_for(&CallId::from("CA1"), Duration::from_millis(50))
            .await;
        assert!(reference.is_none());
    }

    #[test]
    fn test_record_and_forget() {
        let ledger = RecordingLedger::new();
        let call_id = CallId::from("CA2");
        ledger.record(call_id.clone(), "first");
        ledger.record(call_id.clone(), "second");
        assert_eq!(ledger.get(&call_id).as_deref(), Some("second"));

        assert_eq!(ledger.forget(&call_id).as_deref(), Some("second"));
        assert!(ledger.is_empty());
    }
}
