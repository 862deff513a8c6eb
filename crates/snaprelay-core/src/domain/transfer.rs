//! Transfer sessions: one upload or download attempt from start to terminal state.
//!
//! A store hands back a `TransferSession` that has not started yet. The session
//! owns a driver future (the actual network or memory I/O) and the receiving end
//! of an event channel. The driver reports through a `ProgressReporter`; the
//! orchestrator starts the driver and folds the events into one outcome.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::ids::TransferId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Session state.
///
/// Pending -> Running -> Succeeded | Failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferState::Succeeded | TransferState::Failed)
    }
}

/// Notification emitted by a transfer driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Bytes moved so far, optionally with a non-fatal error message.
    Progress {
        bytes_transferred: u64,
        error: Option<String>,
    },
    /// Terminal signal. `completed` alone decides success.
    Ended {
        completed: bool,
        bytes_transferred: u64,
        error: Option<String>,
        payload: Option<Vec<u8>>,
    },
}

/// Sending half handed to a transfer driver.
///
/// Send failures are ignored: the receiver is gone once the orchestrator has
/// seen the terminal signal.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::UnboundedSender<TransferEvent>,
}

impl ProgressReporter {
    pub fn progress(&self, bytes_transferred: u64) {
        let _ = self.tx.send(TransferEvent::Progress {
            bytes_transferred,
            error: None,
        });
    }

    pub fn progress_with_error(&self, bytes_transferred: u64, error: impl Into<String>) {
        let _ = self.tx.send(TransferEvent::Progress {
            bytes_transferred,
            error: Some(error.into()),
        });
    }

    pub fn completed(self, bytes_transferred: u64) {
        self.end(true, bytes_transferred, None, None);
    }

    pub fn completed_with_payload(self, bytes_transferred: u64, payload: Vec<u8>) {
        self.end(true, bytes_transferred, None, Some(payload));
    }

    pub fn failed(self, bytes_transferred: u64, error: impl Into<String>) {
        self.end(false, bytes_transferred, Some(error.into()), None);
    }

    fn end(
        self,
        completed: bool,
        bytes_transferred: u64,
        error: Option<String>,
        payload: Option<Vec<u8>>,
    ) {
        let _ = self.tx.send(TransferEvent::Ended {
            completed,
            bytes_transferred,
            error,
            payload,
        });
    }
}

/// Mutable state of one transfer attempt. Consumed by the orchestrator.
pub struct TransferSession {
    id: TransferId,
    object_key: String,
    direction: TransferDirection,
    total_bytes: u64,
    bytes_transferred: u64,
    state: TransferState,
    last_error: Option<String>,
    events: mpsc::UnboundedReceiver<TransferEvent>,
    driver: Option<BoxFuture<'static, ()>>,
}

impl TransferSession {
    /// Build a pending session around `drive`. The driver does not run until
    /// the session is taken over by the orchestrator.
    pub fn new<F, Fut>(
        object_key: impl Into<String>,
        direction: TransferDirection,
        total_bytes: u64,
        drive: F,
    ) -> Self
    where
        F: FnOnce(ProgressReporter) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, events) = mpsc::unbounded_channel();
        let driver = drive(ProgressReporter { tx }).boxed();
        Self {
            id: TransferId::generate(),
            object_key: object_key.into(),
            direction,
            total_bytes,
            bytes_transferred: 0,
            state: TransferState::Pending,
            last_error: None,
            events,
            driver: Some(driver),
        }
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn object_key(&self) -> &str {
        &self.object_key
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.bytes_transferred
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub(crate) fn start(&mut self) -> Option<BoxFuture<'static, ()>> {
        self.state = TransferState::Running;
        self.driver.take()
    }

    pub(crate) async fn next_event(&mut self) -> Option<TransferEvent> {
        self.events.recv().await
    }

    /// Apply a byte count; stale counts are ignored. Returns whether it applied.
    pub(crate) fn advance(&mut self, bytes_transferred: u64) -> bool {
        if bytes_transferred < self.bytes_transferred {
            return false;
        }
        self.bytes_transferred = bytes_transferred;
        true
    }

    pub(crate) fn record_error(&mut self, message: Option<String>) {
        if let Some(message) = message.filter(|m| !m.trim().is_empty()) {
            self.last_error = Some(message);
        }
    }

    pub(crate) fn finish(&mut self, completed: bool, bytes_transferred: u64) {
        self.bytes_transferred = self.bytes_transferred.max(bytes_transferred);
        self.state = if completed {
            TransferState::Succeeded
        } else {
            TransferState::Failed
        };
        // no late events once terminal
        self.events.close();
    }
}

impl fmt::Debug for TransferSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferSession")
            .field("id", &self.id)
            .field("object_key", &self.object_key)
            .field("direction", &self.direction)
            .field("total_bytes", &self.total_bytes)
            .field("bytes_transferred", &self.bytes_transferred)
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .finish()
    }
}

/// Single observable result of driving a session (or a set of part sessions).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub transfer_id: TransferId,
    pub object_key: String,
    pub direction: TransferDirection,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub succeeded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn driver_does_not_run_before_start() {
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<()>();
        let mut session = TransferSession::new("k", TransferDirection::Upload, 3, |reporter| {
            async move {
                let _ = seen_tx.send(());
                reporter.completed(3);
            }
        });

        assert_eq!(session.state(), TransferState::Pending);
        assert!(seen_rx.try_recv().is_err());

        let driver = session.start().unwrap();
        assert_eq!(session.state(), TransferState::Running);
        driver.await;

        assert!(seen_rx.try_recv().is_ok());
        assert_eq!(
            session.next_event().await,
            Some(TransferEvent::Ended {
                completed: true,
                bytes_transferred: 3,
                error: None,
                payload: None,
            })
        );
    }

    #[test]
    fn stale_byte_counts_are_ignored() {
        let mut session =
            TransferSession::new("k", TransferDirection::Upload, 10, |_reporter| async {});

        assert!(session.advance(4));
        assert!(!session.advance(2));
        assert!(session.advance(4));
        assert_eq!(session.bytes_transferred(), 4);
    }

    #[test]
    fn blank_errors_are_not_recorded() {
        let mut session =
            TransferSession::new("k", TransferDirection::Upload, 10, |_reporter| async {});

        session.record_error(Some("  ".into()));
        assert_eq!(session.last_error(), None);

        session.record_error(Some("segment upload retried".into()));
        session.record_error(None);
        assert_eq!(session.last_error(), Some("segment upload retried"));
    }
}
