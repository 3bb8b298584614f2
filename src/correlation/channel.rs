//! Control-event channel between the gateway and the runner
//!
//! Unbounded, multi-producer, single-consumer. Control events are low
//! volume (one or two per call), so producers never wait. The receiver is
//! not `Clone` and every receive takes `&mut self`, so exactly one task
//! consumes a given channel.

use std::time::Duration;
use tokio::sync::mpsc;

/// Create a connected sender/receiver pair
pub fn control_channel<T>() -> (ControlSender<T>, ControlReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ControlSender { inner: tx }, ControlReceiver { inner: rx })
}

/// Producer half; safe to use from any task or thread
#[derive(Debug)]
pub struct ControlSender<T> {
    inner: mpsc::UnboundedSender<T>,
}

impl<T> Clone for ControlSender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> ControlSender<T> {
    /// Enqueue without waiting. Returns false if the consumer is gone.
    pub fn send(&self, value: T) -> bool {
        self.inner.send(value).is_ok()
    }
}

/// Why a bounded receive ended without a value
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecvTimeoutError {
    #[error("timed out waiting for control event")]
    Timeout,
    #[error("control channel closed")]
    Closed,
}

/// Consumer half
#[derive(Debug)]
pub struct ControlReceiver<T> {
    inner: mpsc::UnboundedReceiver<T>,
}

impl<T> ControlReceiver<T> {
    /// Wait for the next event; `None` once every sender is dropped
    pub async fn recv(&mut self) -> Option<T> {
        self.inner.recv().await
    }

    /// Wait for the next event, giving up after `timeout`
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        match tokio::time::timeout(timeout, self.inner.recv()).await {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(RecvTimeoutError::Closed),
            Err(_) => Err(RecvTimeoutError::Timeout),
        }
    }

    /// Take everything already queued without waiting
    pub fn drain(&mut self) -> Vec<T> {
        let mut drained = Vec::new();
        while let Ok(value) = self.inner.try_recv() {
            drained.push(value);
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_recv_in_order() {
        let (tx, mut rx) = control_channel();
        assert!(tx.send("CA1"));
        assert!(tx.send("CA2"));

        assert_eq!(rx.recv().await, Some("CA1"));
        assert_eq!(rx.recv().await, Some("CA2"));
    }

    #[tokio::test]
    async fn test_recv_timeout() {
        let (tx, mut rx) = control_channel::<u32>();
        let result = rx.recv_timeout(Duration::from_millis(20)).await;
        assert_eq!(result, Err(RecvTimeoutError::Timeout));

        drop(tx);
        let result = rx.recv_timeout(Duration::from_millis(20)).await;
        assert_eq!(result, Err(RecvTimeoutError::Closed));
    }

    #[tokio::test]
    async fn test_send_from_other_thread() {
        let (tx, mut rx) = control_channel();
        let handle = std::thread::spawn(move || {
            tx.send(42u32);
        });
        let value = rx.recv_timeout(Duration::from_secs(1)).await;
        handle.join().unwrap();
        assert_eq!(value, Ok(42));
    }

    #[test]
    fn test_drain_and_closed_sender() {
        let (tx, mut rx) = control_channel();
        tx.send(1);
        tx.send(2);
        assert_eq!(rx.drain(), vec![1, 2]);
        assert!(rx.drain().is_empty());

        drop(rx);
        assert!(!tx.send(3));
    }
}
