//! Live media sessions, keyed by call
//!
//! Each provider media stream is served by its own task. The runner asks
//! here whether a call's session has ended before reading the call's
//! transcript, and closes whatever is still running before the next test
//! case starts.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, warn};

use crate::models::CallId;

/// Bound on the wait for an aborted session to unwind
const ABORT_WAIT: Duration = Duration::from_secs(2);

/// How a call's media session was closed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionClose {
    /// No session was tracked for the call
    Absent,
    /// The session ended on its own within the drain period
    Ended,
    /// The session outlived the drain period and was aborted
    Aborted,
}

struct LiveSession {
    ended: watch::Receiver<bool>,
    abort: AbortHandle,
}

impl LiveSession {
    fn has_ended(&self) -> bool {
        *self.ended.borrow()
    }
}

/// Flags the session as ended when dropped, whether it finished or was aborted
struct EndedGuard(watch::Sender<bool>);

impl Drop for EndedGuard {
    fn drop(&mut self) {
        self.0.send_replace(true);
    }
}

/// A session future plus its end flag.
///
/// Fields drop in declaration order: the session is gone before `ended` fires.
struct Tracked<F> {
    session: Pin<Box<F>>,
    _ended: EndedGuard,
}

impl<F: Future<Output = ()>> Future for Tracked<F> {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        self.session.as_mut().poll(cx)
    }
}

/// Registry of media sessions the gateway is serving
#[derive(Default)]
pub struct MediaSessions {
    sessions: Mutex<HashMap<CallId, LiveSession>>,
}

impl MediaSessions {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<CallId, LiveSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serve `call_id`'s media on a tracked task
    pub(crate) fn spawn<F>(&self, call_id: CallId, session: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (ended_tx, ended_rx) = watch::channel(false);
        let task = tokio::spawn(Tracked {
            session: Box::pin(session),
            _ended: EndedGuard(ended_tx),
        });

        let live = LiveSession {
            ended: ended_rx,
            abort: task.abort_handle(),
        };
        if let Some(previous) = self.sessions().insert(call_id.clone(), live) {
            if !previous.has_ended() {
                warn!("Second media stream for call {}; aborting the first", call_id);
                previous.abort.abort();
            }
        }
        task
    }

    /// Drop the entry for a session that ended on its own
    pub(crate) fn forget(&self, call_id: &CallId) {
        let mut sessions = self.sessions();
        if sessions.get(call_id).is_some_and(LiveSession::has_ended) {
            sessions.remove(call_id);
        }
    }

    pub fn is_live(&self, call_id: &CallId) -> bool {
        self.sessions()
            .get(call_id)
            .is_some_and(|s| !s.has_ended())
    }

    /// Wait up to `timeout` for `call_id`'s session to end.
    ///
    /// True when it ended, or when no session was ever tracked for the call.
    pub async fn wait_ended(&self, call_id: &CallId, timeout: Duration) -> bool {
        let ended = self.sessions().get(call_id).map(|s| s.ended.clone());
        match ended {
            Some(ended) => wait_for_end(ended, timeout).await,
            None => true,
        }
    }

    /// Give the session `drain` to end, abort it otherwise, then forget it
    pub async fn close(&self, call_id: &CallId, drain: Duration) -> SessionClose {
        if !self.sessions().contains_key(call_id) {
            return SessionClose::Absent;
        }

        let outcome = if self.wait_ended(call_id, drain).await {
            SessionClose::Ended
        } else {
            warn!(
                "Media session for call {} still running {}ms after the call; aborting",
                call_id,
                drain.as_millis()
            );
            if let Some(ended) = self.abort(call_id) {
                if !wait_for_end(ended, ABORT_WAIT).await {
                    warn!("Media session for call {} did not unwind after abort", call_id);
                }
            }
            SessionClose::Aborted
        };

        self.sessions().remove(call_id);
        debug!("Media session for call {} closed: {:?}", call_id, outcome);
        outcome
    }

    fn abort(&self, call_id: &CallId) -> Option<watch::Receiver<bool>> {
        let sessions = self.sessions();
        let session = sessions.get(call_id)?;
        session.abort.abort();
        Some(session.ended.clone())
    }

    /// Abort every session still running; returns how many were live
    pub fn abort_all(&self) -> usize {
        let drained: Vec<LiveSession> = self.sessions().drain().map(|(_, s)| s).collect();
        let mut aborted = 0;
        for session in drained {
            if !session.has_ended() {
                session.abort.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

async fn wait_for_end(mut ended: watch::Receiver<bool>, timeout: Duration) -> bool {
    let wait = async {
        loop {
            if *ended.borrow_and_update() {
                return;
            }
            // A closed channel means the guard is gone
            if ended.changed().await.is_err() {
                return;
            }
        }
    };
    tokio::time::timeout(timeout, wait).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    /// Sets its flag when dropped
    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_untracked_call_counts_as_ended() {
        let sessions = MediaSessions::new();
        let call_id = CallId::from("CA0");
        assert!(!sessions.is_live(&call_id));
        assert!(sessions.wait_ended(&call_id, Duration::from_millis(10)).await);
        assert_eq!(
            sessions.close(&call_id, Duration::from_millis(10)).await,
            SessionClose::Absent
        );
    }

    #[tokio::test]
    async fn test_session_that_ends_in_time() {
        let sessions = MediaSessions::new();
        let call_id = CallId::from("CA1");
        sessions.spawn(call_id.clone(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
        });
        assert!(sessions.is_live(&call_id));

        assert!(sessions.wait_ended(&call_id, Duration::from_secs(2)).await);
        assert!(!sessions.is_live(&call_id));
        assert_eq!(
            sessions.close(&call_id, Duration::from_secs(1)).await,
            SessionClose::Ended
        );
    }

    #[tokio::test]
    async fn test_lingering_session_is_aborted_and_dropped_before_close_returns() {
        let sessions = MediaSessions::new();
        let call_id = CallId::from("CA2");
        let dropped = Arc::new(AtomicBool::new(false));
        let flag = DropFlag(Arc::clone(&dropped));
        let task = sessions.spawn(call_id.clone(), async move {
            let _flag = flag;
            std::future::pending::<()>().await;
        });

        assert!(!sessions.wait_ended(&call_id, Duration::from_millis(50)).await);
        assert_eq!(
            sessions.close(&call_id, Duration::from_millis(50)).await,
            SessionClose::Aborted
        );
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!sessions.is_live(&call_id));
        assert!(task.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_forget_keeps_live_sessions() {
        let sessions = MediaSessions::new();
        let call_id = CallId::from("CA3");
        sessions.spawn(call_id.clone(), std::future::pending::<()>());
        sessions.forget(&call_id);
        assert!(sessions.is_live(&call_id));

        assert_eq!(sessions.abort_all(), 1);
        assert!(!sessions.is_live(&call_id));
    }
}
