//! TransferOrchestrator - 転送セッションを終端状態まで駆動する
//!
//! # 設計原則
//! - 完了判定は `Ended` イベントだけで行う（途中のエラー通知では終わらない）
//! - `on_progress` に渡るバイト数は単調非減少
//! - 結果は一つの `TransferOutcome` として返す

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{debug, warn};

use crate::domain::{TransferDirection, TransferEvent, TransferOutcome, TransferSession};

const INCOMPLETE: &str = "transfer did not complete";

#[derive(Debug, Clone, Default)]
pub struct TransferOrchestrator {
    download_dir: Option<PathBuf>,
}

impl TransferOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Successful downloads are also written under `dir`.
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// Drive `session` until its terminal signal.
    ///
    /// `on_progress(bytes, total)` is called for every accepted progress
    /// event. Nothing is called after this returns.
    pub async fn run_to_completion<F>(
        &self,
        mut session: TransferSession,
        mut on_progress: F,
    ) -> TransferOutcome
    where
        F: FnMut(u64, u64) + Send,
    {
        let started = Instant::now();
        let total = session.total_bytes();
        let driver = session.start().map(tokio::spawn);

        let mut completed = false;
        let mut ended = false;
        let mut payload = None;
        while let Some(event) = session.next_event().await {
            match event {
                TransferEvent::Progress {
                    bytes_transferred,
                    error,
                } => {
                    if let Some(message) = error.as_deref().filter(|m| !m.trim().is_empty()) {
                        warn!(
                            object_key = session.object_key(),
                            bytes_transferred,
                            error = message,
                            "transfer reported an error"
                        );
                    }
                    session.record_error(error);
                    if session.advance(bytes_transferred) {
                        on_progress(bytes_transferred, total);
                    }
                }
                TransferEvent::Ended {
                    completed: done,
                    bytes_transferred,
                    error,
                    payload: data,
                } => {
                    session.record_error(error);
                    session.finish(done, bytes_transferred);
                    completed = done;
                    ended = true;
                    payload = data;
                    break;
                }
            }
        }
        if !ended {
            session.finish(false, session.bytes_transferred());
        }

        if let Some(driver) = driver
            && let Err(e) = driver.await
            && !completed
        {
            session.record_error(Some(format!("transfer driver stopped: {e}")));
        }

        if completed
            && session.direction() == TransferDirection::Download
            && let (Some(dir), Some(data)) = (&self.download_dir, payload.as_deref())
        {
            persist_download(dir, session.object_key(), data).await;
        }

        let error_message = if completed {
            None
        } else {
            Some(
                session
                    .last_error()
                    .unwrap_or(INCOMPLETE)
                    .to_string(),
            )
        };
        let outcome = TransferOutcome {
            transfer_id: session.id(),
            object_key: session.object_key().to_string(),
            direction: session.direction(),
            bytes_transferred: session.bytes_transferred(),
            total_bytes: total,
            succeeded: completed,
            error_message,
            duration: started.elapsed(),
        };
        debug!(
            transfer_id = %outcome.transfer_id,
            object_key = %outcome.object_key,
            succeeded = outcome.succeeded,
            bytes_transferred = outcome.bytes_transferred,
            "transfer finished"
        );
        outcome
    }

    /// Drive the part sessions of one chunked upload, in order.
    ///
    /// Progress is cumulative over the sum of part sizes. The combined outcome
    /// succeeds only if every part did.
    pub async fn run_chunked<F>(
        &self,
        sessions: Vec<TransferSession>,
        mut on_progress: F,
    ) -> TransferOutcome
    where
        F: FnMut(u64, u64) + Send,
    {
        let started = Instant::now();
        let total: u64 = sessions.iter().map(TransferSession::total_bytes).sum();
        let object_key = sessions
            .first()
            .map(|s| s.object_key().to_string())
            .unwrap_or_default();

        let mut done = 0u64;
        let mut first_id = None;
        let mut failure: Option<String> = None;
        for session in sessions {
            let base = done;
            let part = self
                .run_to_completion(session, |bytes, _| on_progress(base + bytes, total))
                .await;
            first_id.get_or_insert(part.transfer_id);
            done += part.bytes_transferred;
            if !part.succeeded && failure.is_none() {
                failure = part.error_message;
            }
        }

        TransferOutcome {
            transfer_id: first_id.unwrap_or_else(crate::domain::TransferId::generate),
            object_key,
            direction: TransferDirection::Upload,
            bytes_transferred: done,
            total_bytes: total,
            succeeded: failure.is_none(),
            error_message: failure,
            duration: started.elapsed(),
        }
    }
}

/// Object keys may contain `/`; flatten them into one file name.
fn download_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(key.replace('/', "_"))
}

async fn persist_download(dir: &Path, key: &str, data: &[u8]) {
    let path = download_path(dir, key);
    match tokio::fs::write(&path, data).await {
        Ok(()) => debug!(path = %path.display(), bytes = data.len(), "download written"),
        Err(e) => warn!(
            path = %path.display(),
            error = %e,
            "failed to write downloaded object"
        ),
    }
}
