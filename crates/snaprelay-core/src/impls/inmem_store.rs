//! InMemoryObjectStore - 開発用・テスト用のオブジェクトストア
//!
//! # 実装詳細
//! - バケットごとに `BTreeMap<key, object>` を持つ（list はキー順）
//! - upload_chunked は part をステージングし、最後の part が commit する
//! - 障害注入: 認証失敗・転送失敗・進捗中のエラー通知

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::multipart::{self, ChunkRange, MultipartTarget};
use crate::domain::{
    BucketHandle, ByteSource, ObjectInfo, ObjectListing, StoreError, TransferDirection,
    TransferSession,
};
use crate::ports::{DownloadOptions, ListObjectsOptions, ObjectStore, UploadOptions};

/// Progress granularity of in-memory downloads.
const DOWNLOAD_STEP: usize = 64 * 1024;

#[derive(Debug)]
struct MemObject {
    data: Vec<u8>,
    created: DateTime<Utc>,
}

#[derive(Debug)]
struct MemBucket {
    created: DateTime<Utc>,
    objects: BTreeMap<String, MemObject>,
}

impl MemBucket {
    fn new() -> Self {
        Self {
            created: Utc::now(),
            objects: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Faults {
    auth_failure: Option<String>,
    transfer_failure: Option<String>,
    progress_notice: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    uploads: AtomicUsize,
    downloads: AtomicUsize,
    resolves: AtomicUsize,
}

type Buckets = Arc<Mutex<HashMap<String, MemBucket>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// InMemoryObjectStore はプロセス内で完結するストア
///
/// Clone したハンドルは同じ中身を共有します（テストで検証に使う）。
///
/// # 使用例
/// ```ignore
/// let store = InMemoryObjectStore::new().with_bucket("flureebucket");
/// let bucket = store.resolve_bucket("flureebucket").await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    buckets: Buckets,
    faults: Arc<Mutex<Faults>>,
    counters: Arc<Counters>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, name: impl Into<String>) -> Self {
        self.create_bucket(name);
        self
    }

    pub fn create_bucket(&self, name: impl Into<String>) {
        lock(&self.buckets)
            .entry(name.into())
            .or_insert_with(MemBucket::new);
    }

    /// Every call fails with `AuthFailure` until cleared.
    pub fn set_auth_failure(&self, message: Option<String>) {
        lock(&self.faults).auth_failure = message;
    }

    /// Transfers run to the end and then fail with `message`.
    pub fn set_transfer_failure(&self, message: Option<String>) {
        lock(&self.faults).transfer_failure = message;
    }

    /// Uploads emit one progress event carrying `message` and still succeed.
    pub fn set_progress_notice(&self, message: Option<String>) {
        lock(&self.faults).progress_notice = message;
    }

    /// Seed an object directly.
    pub fn put_object(&self, bucket: &str, key: impl Into<String>, data: Vec<u8>) {
        lock(&self.buckets)
            .entry(bucket.to_string())
            .or_insert_with(MemBucket::new)
            .objects
            .insert(
                key.into(),
                MemObject {
                    data,
                    created: Utc::now(),
                },
            );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        lock(&self.buckets)
            .get(bucket)
            .and_then(|b| b.objects.get(key))
            .map(|o| o.data.clone())
    }

    pub fn upload_calls(&self) -> usize {
        self.counters.uploads.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.counters.downloads.load(Ordering::SeqCst)
    }

    pub fn resolve_calls(&self) -> usize {
        self.counters.resolves.load(Ordering::SeqCst)
    }

    fn faults(&self) -> Result<Faults, StoreError> {
        let faults = lock(&self.faults).clone();
        match &faults.auth_failure {
            Some(message) => Err(StoreError::AuthFailure(message.clone())),
            None => Ok(faults),
        }
    }

    /// Fails on a missing bucket, or on an existing key when overwrite is off.
    fn check_writable(
        &self,
        bucket: &BucketHandle,
        key: &str,
        options: &UploadOptions,
    ) -> Result<(), StoreError> {
        let buckets = lock(&self.buckets);
        let existing = buckets
            .get(&bucket.name)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.name.clone()))?;
        if !options.overwrite && existing.objects.contains_key(key) {
            return Err(StoreError::ObjectExists {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list_buckets(&self) -> Result<Vec<BucketHandle>, StoreError> {
        self.faults()?;
        let buckets = lock(&self.buckets);
        let mut handles: Vec<BucketHandle> = buckets
            .iter()
            .map(|(name, bucket)| BucketHandle {
                name: name.clone(),
                created: Some(bucket.created),
            })
            .collect();
        handles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(handles)
    }

    async fn resolve_bucket(&self, name: &str) -> Result<BucketHandle, StoreError> {
        self.faults()?;
        self.counters.resolves.fetch_add(1, Ordering::SeqCst);
        lock(&self.buckets)
            .get(name)
            .map(|bucket| BucketHandle {
                name: name.to_string(),
                created: Some(bucket.created),
            })
            .ok_or_else(|| StoreError::BucketNotFound(name.to_string()))
    }

    async fn upload(
        &self,
        bucket: &BucketHandle,
        key: &str,
        source: ByteSource,
        options: &UploadOptions,
    ) -> Result<TransferSession, StoreError> {
        let faults = self.faults()?;
        self.counters.uploads.fetch_add(1, Ordering::SeqCst);
        self.check_writable(bucket, key, options)?;

        let buckets = Arc::clone(&self.buckets);
        let bucket_name = bucket.name.clone();
        let object_key = key.to_string();
        let step = options.buffer_size;
        let total = source.len();

        Ok(TransferSession::new(
            key,
            TransferDirection::Upload,
            total,
            move |reporter| async move {
                let mut source = source;
                let mut notice = faults.progress_notice;
                let mut data = Vec::with_capacity(total as usize);
                loop {
                    match source.read_chunk(step).await {
                        Ok(Some(chunk)) => {
                            data.extend_from_slice(&chunk);
                            let sent = data.len() as u64;
                            reporter.progress(sent);
                            if let Some(message) = notice.take() {
                                reporter.progress_with_error(sent, message);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            reporter.failed(data.len() as u64, e.to_string());
                            return;
                        }
                    }
                }
                drop(source);

                let sent = data.len() as u64;
                if let Some(message) = faults.transfer_failure {
                    reporter.failed(sent, message);
                    return;
                }

                let stored = match lock(&buckets).get_mut(&bucket_name) {
                    Some(bucket) => {
                        bucket.objects.insert(
                            object_key,
                            MemObject {
                                data,
                                created: Utc::now(),
                            },
                        );
                        true
                    }
                    None => false,
                };
                if stored {
                    reporter.completed(sent);
                } else {
                    reporter.failed(sent, format!("bucket {bucket_name} disappeared during upload"));
                }
            },
        ))
    }

    async fn upload_chunked(
        &self,
        bucket: &BucketHandle,
        key: &str,
        chunk_size: u64,
        source: ByteSource,
        options: &UploadOptions,
    ) -> Result<Vec<TransferSession>, StoreError> {
        let faults = self.faults()?;
        self.counters.uploads.fetch_add(1, Ordering::SeqCst);
        self.check_writable(bucket, key, options)?;
        let plan = multipart::plan_chunks(source.len(), chunk_size)?;

        let target = Arc::new(MemMultipart {
            buckets: Arc::clone(&self.buckets),
            bucket: bucket.name.clone(),
            key: key.to_string(),
            staged: Mutex::new(BTreeMap::new()),
            failure: faults.transfer_failure,
        });
        Ok(multipart::part_sessions(key, plan, source, target))
    }

    async fn download(
        &self,
        bucket: &BucketHandle,
        key: &str,
        options: &DownloadOptions,
    ) -> Result<TransferSession, StoreError> {
        let faults = self.faults()?;
        self.counters.downloads.fetch_add(1, Ordering::SeqCst);

        let data = {
            let buckets = lock(&self.buckets);
            let existing = buckets
                .get(&bucket.name)
                .ok_or_else(|| StoreError::BucketNotFound(bucket.name.clone()))?;
            let object = existing
                .objects
                .get(key)
                .ok_or_else(|| StoreError::ObjectNotFound {
                    bucket: bucket.name.clone(),
                    key: key.to_string(),
                })?;
            let (start, len) = options.resolve(object.data.len() as u64);
            object.data[start as usize..(start + len) as usize].to_vec()
        };
        let total = data.len() as u64;

        Ok(TransferSession::new(
            key,
            TransferDirection::Download,
            total,
            move |reporter| async move {
                let mut received = 0usize;
                for chunk in data.chunks(DOWNLOAD_STEP) {
                    received += chunk.len();
                    reporter.progress(received as u64);
                }
                match faults.transfer_failure {
                    Some(message) => reporter.failed(received as u64, message),
                    None => reporter.completed_with_payload(received as u64, data),
                }
            },
        ))
    }

    async fn list_objects(
        &self,
        bucket: &BucketHandle,
        options: &ListObjectsOptions,
    ) -> Result<ObjectListing, StoreError> {
        self.faults()?;
        let buckets = lock(&self.buckets);
        let existing = buckets
            .get(&bucket.name)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.name.clone()))?;
        let prefix = options.prefix.as_deref().unwrap_or("");
        let objects = existing
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| ObjectInfo {
                key: key.clone(),
                created: Some(object.created),
                size: object.data.len() as u64,
            })
            .collect();
        Ok(ObjectListing::from_vec(objects))
    }

    fn store_type(&self) -> &'static str {
        "memory"
    }
}

struct MemMultipart {
    buckets: Buckets,
    bucket: String,
    key: String,
    staged: Mutex<BTreeMap<usize, Vec<u8>>>,
    failure: Option<String>,
}

#[async_trait]
impl MultipartTarget for MemMultipart {
    async fn put_part(&self, part: ChunkRange, data: Vec<u8>) -> Result<(), StoreError> {
        if let Some(message) = &self.failure {
            return Err(StoreError::Network(message.clone()));
        }
        lock(&self.staged).insert(part.index, data);
        Ok(())
    }

    async fn commit(&self, parts: usize) -> Result<(), StoreError> {
        let staged = std::mem::take(&mut *lock(&self.staged));
        if staged.len() != parts || staged.keys().copied().ne(0..parts) {
            return Err(StoreError::InvalidRequest(format!(
                "expected parts 0..{parts}, have {} staged",
                staged.len()
            )));
        }
        let data: Vec<u8> = staged.into_values().flatten().collect();

        let mut buckets = lock(&self.buckets);
        let bucket = buckets
            .get_mut(&self.bucket)
            .ok_or_else(|| StoreError::BucketNotFound(self.bucket.clone()))?;
        bucket.objects.insert(
            self.key.clone(),
            MemObject {
                data,
                created: Utc::now(),
            },
        );
        Ok(())
    }

    async fn abort(&self) {
        lock(&self.staged).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransferEvent;

    async fn drive(mut session: TransferSession) -> Vec<TransferEvent> {
        if let Some(driver) = session.start() {
            driver.await;
        }
        let mut events = Vec::new();
        while let Ok(Some(event)) =
            tokio::time::timeout(std::time::Duration::from_millis(50), session.next_event()).await
        {
            let ended = matches!(event, TransferEvent::Ended { .. });
            events.push(event);
            if ended {
                break;
            }
        }
        events
    }

    fn ended(events: &[TransferEvent]) -> Option<bool> {
        events.iter().find_map(|e| match e {
            TransferEvent::Ended { completed, .. } => Some(*completed),
            _ => None,
        })
    }

    #[tokio::test]
    async fn upload_stores_the_object() {
        let store = InMemoryObjectStore::new().with_bucket("flureebucket");
        let bucket = store.resolve_bucket("flureebucket").await.unwrap();

        let session = store
            .upload(
                &bucket,
                "1585578518736.avro",
                ByteSource::from_bytes(b"avro-bytes".to_vec()),
                &UploadOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(session.total_bytes(), 10);

        let events = drive(session).await;
        assert_eq!(ended(&events), Some(true));
        assert_eq!(
            store.object("flureebucket", "1585578518736.avro").as_deref(),
            Some(&b"avro-bytes"[..])
        );
        assert_eq!(store.upload_calls(), 1);
    }

    #[tokio::test]
    async fn missing_bucket_is_reported() {
        let store = InMemoryObjectStore::new();
        let err = store.resolve_bucket("nope").await.unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound(name) if name == "nope"));
    }

    #[tokio::test]
    async fn overwrite_off_rejects_existing_key() {
        let store = InMemoryObjectStore::new().with_bucket("b");
        store.put_object("b", "k", b"old".to_vec());
        let bucket = store.resolve_bucket("b").await.unwrap();
        let options = UploadOptions {
            overwrite: false,
            ..UploadOptions::default()
        };

        let err = store
            .upload(&bucket, "k", ByteSource::from_bytes(b"new".to_vec()), &options)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ObjectExists { .. }));
        assert_eq!(store.object("b", "k").as_deref(), Some(&b"old"[..]));
    }

    #[tokio::test]
    async fn auth_failure_rejects_every_call() {
        let store = InMemoryObjectStore::new().with_bucket("b");
        store.set_auth_failure(Some("invalid api key".into()));

        assert!(matches!(
            store.list_buckets().await,
            Err(StoreError::AuthFailure(_))
        ));
        assert!(matches!(
            store.resolve_bucket("b").await,
            Err(StoreError::AuthFailure(_))
        ));
    }

    #[tokio::test]
    async fn progress_notice_does_not_fail_the_upload() {
        let store = InMemoryObjectStore::new().with_bucket("b");
        store.set_progress_notice(Some("segment retried".into()));
        let bucket = store.resolve_bucket("b").await.unwrap();

        let session = store
            .upload(
                &bucket,
                "k",
                ByteSource::from_bytes(vec![7; 32]),
                &UploadOptions::default(),
            )
            .await
            .unwrap();
        let events = drive(session).await;

        assert!(events.iter().any(|e| matches!(
            e,
            TransferEvent::Progress { error: Some(m), .. } if m == "segment retried"
        )));
        assert_eq!(ended(&events), Some(true));
    }

    #[tokio::test]
    async fn chunked_upload_assembles_parts_in_order() {
        let store = InMemoryObjectStore::new().with_bucket("b");
        let bucket = store.resolve_bucket("b").await.unwrap();

        let sessions = store
            .upload_chunked(
                &bucket,
                "k",
                3,
                ByteSource::from_bytes(b"abcdefgh".to_vec()),
                &UploadOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(sessions.len(), 3);

        for session in sessions {
            assert_eq!(ended(&drive(session).await), Some(true));
        }
        assert_eq!(store.object("b", "k").as_deref(), Some(&b"abcdefgh"[..]));
    }

    #[tokio::test]
    async fn download_honours_range() {
        let store = InMemoryObjectStore::new().with_bucket("b");
        store.put_object("b", "k", b"0123456789".to_vec());
        let bucket = store.resolve_bucket("b").await.unwrap();

        let session = store
            .download(
                &bucket,
                "k",
                &DownloadOptions {
                    offset: 2,
                    length: Some(3),
                },
            )
            .await
            .unwrap();
        let events = drive(session).await;

        assert!(events.iter().any(|e| matches!(
            e,
            TransferEvent::Ended { payload: Some(p), .. } if p == b"234"
        )));
        assert_eq!(store.download_calls(), 1);
        assert_eq!(store.upload_calls(), 0);
    }

    #[tokio::test]
    async fn list_objects_filters_by_prefix() {
        let store = InMemoryObjectStore::new().with_bucket("b");
        store.put_object("b", "1585578518736.avro", vec![0; 4]);
        store.put_object("b", "other.avro", vec![0; 2]);
        let bucket = store.resolve_bucket("b").await.unwrap();

        let objects = store
            .list_objects(&bucket, &ListObjectsOptions::with_prefix("1585"))
            .await
            .unwrap()
            .collect_all()
            .await
            .unwrap();

        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].key, "1585578518736.avro");
        assert_eq!(objects[0].size, 4);
    }
}
