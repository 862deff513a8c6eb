//! ReplicationLoop - 固定間隔でスナップショットを作成しアップロードする
//!
//! # フロー（1 サイクル）
//! 1. スナップショット作成（または設定済みトークンを使用）
//! 2. ディレクトリから成果物を特定
//! 3. バケットを解決（サイクルごとに毎回）
//! 4. アップロード（単一 / チャンク）
//! 5. 任意で検証（list で key とサイズを確認）
//! 6. 結果をログに出す
//! 7. キャンセル可能な sleep
//!
//! サイクル境界ですべてのエラーをログに変換します。Fatal だけがループを止めます。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::locator::SnapshotLocator;
use super::orchestrator::TransferOrchestrator;
use super::status::{CycleReport, CycleSummary};
use crate::domain::{
    BucketHandle, CycleError, ErrorKind, ReplicationError, SnapshotArtifact, TransferOutcome,
};
use crate::ports::{Clock, IdGenerator, ListObjectsOptions, ObjectStore, UploadOptions};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Where the match token of a cycle comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Ask the database for a fresh snapshot every cycle.
    Create,
    /// Skip creation and look for this token.
    Existing(String),
}

#[derive(Debug, Clone)]
pub struct ReplicationSettings {
    pub database: String,
    pub bucket: String,
    pub interval: Duration,
    pub snapshot: SnapshotSource,
    pub upload: UploadOptions,
    /// Upload as a multipart of this chunk size instead of one object.
    pub chunk_size: Option<u64>,
    pub verify: bool,
}

impl ReplicationSettings {
    pub fn new(database: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            bucket: bucket.into(),
            interval: DEFAULT_INTERVAL,
            snapshot: SnapshotSource::Create,
            upload: UploadOptions::default(),
            chunk_size: None,
            verify: false,
        }
    }
}

/// Idle -> Running -> Idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
}

/// ReplicationLoop はサイクルを順番に実行する
///
/// # 設計原則
/// - ストアのハンドルは起動時に一つだけ作り、全サイクルで共有する
/// - サイクル間で状態を持ち越さない（バケットも毎回解決する）
/// - 前のサイクルの転送が終端になるまで次のサイクルは始まらない
pub struct ReplicationLoop {
    settings: ReplicationSettings,
    locator: SnapshotLocator,
    store: Arc<dyn ObjectStore>,
    orchestrator: TransferOrchestrator,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    state: watch::Sender<LoopState>,
}

impl ReplicationLoop {
    pub(crate) fn new(
        settings: ReplicationSettings,
        locator: SnapshotLocator,
        store: Arc<dyn ObjectStore>,
        orchestrator: TransferOrchestrator,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            settings,
            locator,
            store,
            orchestrator,
            clock,
            ids,
            state,
        }
    }

    pub fn settings(&self) -> &ReplicationSettings {
        &self.settings
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    /// Run one cycle and log its outcome. Never panics on cycle errors.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = self.ids.generate_cycle_id();
        let span = info_span!("cycle", cycle_id = %cycle_id);

        async {
            self.state.send_replace(LoopState::Running);
            let started_at = self.clock.now();
            let result = self.execute_cycle().await;
            let finished_at = self.clock.now();
            self.state.send_replace(LoopState::Idle);

            let report = CycleReport {
                cycle_id,
                started_at,
                finished_at,
                result,
            };
            log_report(&report);
            report
        }
        .instrument(span)
        .await
    }

    async fn execute_cycle(&self) -> Result<CycleSummary, CycleError> {
        let token = match &self.settings.snapshot {
            SnapshotSource::Create => {
                let id = self.locator.create_snapshot(&self.settings.database).await?;
                id.match_token().to_string()
            }
            SnapshotSource::Existing(token) => token.clone(),
        };

        let SnapshotArtifact {
            name: key,
            path,
            size,
            source,
        } = self.locator.locate_artifact(&token).await?;
        debug!(object_key = %key, path = %path.display(), size, "snapshot located");

        let bucket = self.store.resolve_bucket(&self.settings.bucket).await?;

        let on_progress = |bytes: u64, total: u64| {
            debug!(object_key = %key, bytes_transferred = bytes, total_bytes = total, "upload progress");
        };
        let (outcome, parts): (TransferOutcome, usize) = match self.settings.chunk_size {
            Some(chunk_size) => {
                let sessions = self
                    .store
                    .upload_chunked(&bucket, &key, chunk_size, source, &self.settings.upload)
                    .await?;
                let parts = sessions.len();
                (self.orchestrator.run_chunked(sessions, on_progress).await, parts)
            }
            None => {
                let session = self
                    .store
                    .upload(&bucket, &key, source, &self.settings.upload)
                    .await?;
                (self.orchestrator.run_to_completion(session, on_progress).await, 1)
            }
        };

        if !outcome.succeeded {
            return Err(CycleError::Transfer {
                message: outcome
                    .error_message
                    .unwrap_or_else(|| "transfer did not complete".to_string()),
                key,
            });
        }

        if self.settings.verify {
            self.verify(&bucket, &key, size).await?;
        }

        Ok(CycleSummary {
            object_key: key,
            bytes_transferred: outcome.bytes_transferred,
            transfer_duration: outcome.duration,
            parts,
        })
    }

    /// The uploaded key must be listed with the expected size.
    async fn verify(&self, bucket: &BucketHandle, key: &str, expected: u64) -> Result<(), CycleError> {
        let objects = self
            .store
            .list_objects(bucket, &ListObjectsOptions::with_prefix(key))
            .await?
            .collect_all()
            .await?;
        let found = objects.iter().find(|o| o.key == key).map(|o| o.size);
        if found == Some(expected) {
            debug!(object_key = key, size = expected, "upload verified");
            Ok(())
        } else {
            Err(CycleError::Verification {
                key: key.to_string(),
                expected,
                found,
            })
        }
    }

    /// Cycle until `shutdown` turns true (or its sender is dropped).
    ///
    /// Shutdown is checked before each cycle and raced against the sleep; an
    /// upload in flight is not interrupted. A fatal cycle error ends the loop.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ReplicationError> {
        info!(
            database = %self.settings.database,
            bucket = %self.settings.bucket,
            interval_ms = self.settings.interval.as_millis() as u64,
            store = self.store.store_type(),
            "replication loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_cycle().await;
            if report.is_fatal()
                && let Err(source) = report.result
            {
                return Err(ReplicationError::Fatal {
                    cycle: report.cycle_id.to_string(),
                    source,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("replication loop stopped");
        Ok(())
    }

    /// Run on a background task.
    pub fn spawn(self) -> ReplicationHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state_rx = self.subscribe_state();
        let join = tokio::spawn(async move { self.run(shutdown_rx).await });
        ReplicationHandle {
            shutdown_tx,
            state_rx,
            join,
        }
    }
}

fn log_report(report: &CycleReport) {
    let duration_ms = (report.finished_at - report.started_at)
        .num_milliseconds()
        .max(0);
    match &report.result {
        Ok(summary) => info!(
            object_key = %summary.object_key,
            bytes_transferred = summary.bytes_transferred,
            parts = summary.parts,
            duration_ms,
            "snapshot replicated"
        ),
        Err(e) => match e.kind() {
            ErrorKind::Transient => warn!(
                classification = e.classification(),
                error = %e,
                duration_ms,
                "cycle failed, retrying next tick"
            ),
            ErrorKind::Permanent => error!(
                classification = e.classification(),
                error = %e,
                duration_ms,
                "cycle failed"
            ),
            ErrorKind::Fatal => error!(
                classification = e.classification(),
                error = %e,
                duration_ms,
                "cycle failed with a fatal error"
            ),
        },
    }
}

/// Handle to a spawned loop.
/// - `request_shutdown()` は次のサイクル前 / sleep 中に効く
/// - 実行中のアップロードは中断しない
pub struct ReplicationHandle {
    shutdown_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<LoopState>,
    join: JoinHandle<Result<(), ReplicationError>>,
}

impl ReplicationHandle {
    pub fn request_shutdown(&self) {
        // ignore send error: the loop may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    pub fn state(&self) -> LoopState {
        *self.state_rx.borrow()
    }

    pub async fn shutdown_and_join(self) -> Result<(), ReplicationError> {
        self.request_shutdown();
        joined(self.join.await)
    }

    /// Wait for `signal`, then shut down. Returns early if the loop stops on its own.
    pub async fn run_until<S>(mut self, signal: S) -> Result<(), ReplicationError>
    where
        S: Future<Output = ()>,
    {
        tokio::select! {
            result = &mut self.join => return joined(result),
            _ = signal => {}
        }
        self.shutdown_and_join().await
    }
}

fn joined(
    result: Result<Result<(), ReplicationError>, tokio::task::JoinError>,
) -> Result<(), ReplicationError> {
    result.map_err(|e| ReplicationError::Aborted(e.to_string()))?
}
