//! Multipart upload plumbing shared by the store implementations.
//!
//! A chunked upload is one multipart upload on the remote side. Each chunk
//! becomes a part session; parts never overwrite each other. The part session
//! that finishes last either commits all parts in index order or, if any part
//! failed, aborts the whole upload.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{ByteSource, StoreError, TransferDirection, TransferSession};

/// One chunk of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: usize,
    pub offset: u64,
    pub len: u64,
}

/// Split `total` bytes into `chunk_size` ranges. An empty source is one empty part.
pub fn plan_chunks(total: u64, chunk_size: u64) -> Result<Vec<ChunkRange>, StoreError> {
    if chunk_size == 0 {
        return Err(StoreError::InvalidRequest(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    if total == 0 {
        return Ok(vec![ChunkRange {
            index: 0,
            offset: 0,
            len: 0,
        }]);
    }

    let mut chunks = Vec::new();
    let mut offset = 0;
    while offset < total {
        let len = chunk_size.min(total - offset);
        chunks.push(ChunkRange {
            index: chunks.len(),
            offset,
            len,
        });
        offset += len;
    }
    Ok(chunks)
}

/// Remote side of one multipart upload.
#[async_trait]
pub(crate) trait MultipartTarget: Send + Sync + 'static {
    async fn put_part(&self, part: ChunkRange, data: Vec<u8>) -> Result<(), StoreError>;

    /// Assemble parts `0..parts` in order under the final key.
    async fn commit(&self, parts: usize) -> Result<(), StoreError>;

    async fn abort(&self);
}

struct PartTracker {
    remaining: AtomicUsize,
    failed: AtomicBool,
}

impl PartTracker {
    fn mark_failed(&self) {
        self.failed.store(true, Ordering::Release);
    }

    fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    /// True for exactly one caller: the part that finished last.
    fn finish_part(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// Build one pending session per chunk. All sessions read from the same source.
pub(crate) fn part_sessions(
    key: &str,
    plan: Vec<ChunkRange>,
    source: ByteSource,
    target: Arc<dyn MultipartTarget>,
) -> Vec<TransferSession> {
    let parts = plan.len();
    let tracker = Arc::new(PartTracker {
        remaining: AtomicUsize::new(parts),
        failed: AtomicBool::new(false),
    });
    let source = Arc::new(Mutex::new(source));

    plan.into_iter()
        .map(|part| {
            let tracker = Arc::clone(&tracker);
            let source = Arc::clone(&source);
            let target = Arc::clone(&target);
            TransferSession::new(key, TransferDirection::Upload, part.len, move |reporter| {
                async move {
                    if tracker.has_failed() {
                        // a failure is already recorded, so this can only abort
                        let _ = finalize(&tracker, target.as_ref(), parts).await;
                        reporter.failed(
                            0,
                            format!("part {} skipped: an earlier part failed", part.index),
                        );
                        return;
                    }

                    let data = {
                        let mut source = source.lock().await;
                        source.read_range(part.offset, part.len as usize).await
                    };
                    let sent = match data {
                        Ok(data) => target.put_part(part, data).await,
                        Err(e) => Err(StoreError::Io(e)),
                    };
                    match &sent {
                        Ok(()) => reporter.progress(part.len),
                        Err(_) => tracker.mark_failed(),
                    }

                    let finalized = finalize(&tracker, target.as_ref(), parts).await;
                    match (sent, finalized) {
                        (Ok(()), Ok(())) => reporter.completed(part.len),
                        (Err(e), _) => reporter.failed(0, format!("part {}: {e}", part.index)),
                        (Ok(()), Err(e)) => {
                            reporter.failed(part.len, format!("commit of {parts} parts failed: {e}"))
                        }
                    }
                }
            })
        })
        .collect()
}

async fn finalize(
    tracker: &PartTracker,
    target: &dyn MultipartTarget,
    parts: usize,
) -> Result<(), StoreError> {
    if !tracker.finish_part() {
        return Ok(());
    }
    if tracker.has_failed() {
        target.abort().await;
        Ok(())
    } else {
        target.commit(parts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn plan_covers_the_source_without_overlap() {
        let plan = plan_chunks(10, 4).unwrap();
        assert_eq!(
            plan,
            vec![
                ChunkRange { index: 0, offset: 0, len: 4 },
                ChunkRange { index: 1, offset: 4, len: 4 },
                ChunkRange { index: 2, offset: 8, len: 2 },
            ]
        );
    }

    #[test]
    fn plan_rejects_zero_chunk_size() {
        assert!(matches!(plan_chunks(10, 0), Err(StoreError::InvalidRequest(_))));
    }

    #[test]
    fn empty_source_is_a_single_empty_part() {
        assert_eq!(plan_chunks(0, 4).unwrap().len(), 1);
    }

    #[derive(Default)]
    struct RecordingTarget {
        parts: std::sync::Mutex<BTreeMap<usize, Vec<u8>>>,
        committed: std::sync::Mutex<Option<Vec<u8>>>,
        aborted: AtomicBool,
        fail_index: Option<usize>,
    }

    #[async_trait]
    impl MultipartTarget for RecordingTarget {
        async fn put_part(&self, part: ChunkRange, data: Vec<u8>) -> Result<(), StoreError> {
            if self.fail_index == Some(part.index) {
                return Err(StoreError::Network("connection reset".into()));
            }
            self.parts.lock().unwrap().insert(part.index, data);
            Ok(())
        }

        async fn commit(&self, parts: usize) -> Result<(), StoreError> {
            let staged = self.parts.lock().unwrap();
            assert_eq!(staged.len(), parts);
            *self.committed.lock().unwrap() = Some(staged.values().flatten().copied().collect());
            Ok(())
        }

        async fn abort(&self) {
            self.aborted.store(true, Ordering::SeqCst);
        }
    }

    async fn drive(session: &mut TransferSession) -> bool {
        if let Some(driver) = session.start() {
            driver.await;
        }
        let mut completed = false;
        while let Some(event) = session.next_event().await {
            if let crate::domain::TransferEvent::Ended { completed: c, .. } = event {
                completed = c;
                break;
            }
        }
        completed
    }

    #[tokio::test]
    async fn last_part_commits_in_order() {
        let target = Arc::new(RecordingTarget::default());
        let plan = plan_chunks(10, 4).unwrap();
        let mut sessions = part_sessions(
            "1585578518736.avro",
            plan,
            ByteSource::from_bytes(b"0123456789".to_vec()),
            target.clone(),
        );

        for session in sessions.iter_mut() {
            assert!(drive(session).await);
        }

        assert_eq!(
            target.committed.lock().unwrap().as_deref(),
            Some(&b"0123456789"[..])
        );
        assert!(!target.aborted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_part_skips_the_rest_and_aborts() {
        let target = Arc::new(RecordingTarget {
            fail_index: Some(0),
            ..Default::default()
        });
        let plan = plan_chunks(10, 4).unwrap();
        let mut sessions = part_sessions(
            "1585578518736.avro",
            plan,
            ByteSource::from_bytes(b"0123456789".to_vec()),
            target.clone(),
        );

        let results: Vec<bool> = {
            let mut results = Vec::new();
            for session in sessions.iter_mut() {
                results.push(drive(session).await);
            }
            results
        };

        assert_eq!(results, vec![false, false, false]);
        assert!(target.parts.lock().unwrap().is_empty());
        assert!(target.committed.lock().unwrap().is_none());
        assert!(target.aborted.load(Ordering::SeqCst));
    }
}
