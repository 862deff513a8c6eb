//! ObjectStore port - リモートのオブジェクトストレージ
//!
//! 認証やバケット API の詳細は実装側（impls）に閉じ込め、
//! ここでは replication が必要とする最小の能力だけを定義します。

use async_trait::async_trait;

use crate::domain::{BucketHandle, ByteSource, ObjectListing, StoreError, TransferSession};

/// Default read size for streamed transfers.
pub const DEFAULT_BUFFER_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Replace an existing object with the same key.
    pub overwrite: bool,
    pub content_type: Option<String>,
    /// Bytes read from the source per step (also the progress granularity).
    pub buffer_size: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            overwrite: true,
            content_type: None,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

/// Byte range of a download. `length = None` means "to the end".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DownloadOptions {
    pub offset: u64,
    pub length: Option<u64>,
}

impl DownloadOptions {
    /// Resolve the range against an object of `size` bytes.
    pub fn resolve(&self, size: u64) -> (u64, u64) {
        let start = self.offset.min(size);
        let available = size - start;
        let len = self.length.map_or(available, |l| l.min(available));
        (start, len)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListObjectsOptions {
    pub prefix: Option<String>,
    /// Page size used when the implementation pages through the remote.
    pub page_size: usize,
}

impl Default for ListObjectsOptions {
    fn default() -> Self {
        Self {
            prefix: None,
            page_size: 1000,
        }
    }
}

impl ListObjectsOptions {
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            ..Self::default()
        }
    }
}

/// ObjectStore はバケットとオブジェクトへのアクセスを提供
///
/// # 設計原則
/// - ハンドルはプロセス起動時に一度だけ作り、全サイクルで共有する
/// - upload / download は未開始の `TransferSession` を返す（実行は orchestrator）
/// - upload_chunked は本物のマルチパートとして実装する（チャンク同士で上書きしない）
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// All buckets visible under the configured credential.
    async fn list_buckets(&self) -> Result<Vec<BucketHandle>, StoreError>;

    async fn resolve_bucket(&self, name: &str) -> Result<BucketHandle, StoreError>;

    async fn upload(
        &self,
        bucket: &BucketHandle,
        key: &str,
        source: ByteSource,
        options: &UploadOptions,
    ) -> Result<TransferSession, StoreError>;

    /// Split `source` into `chunk_size` parts of one multipart upload.
    ///
    /// Every part is its own session. The part that finishes last commits the
    /// upload (or aborts it if any part failed).
    async fn upload_chunked(
        &self,
        bucket: &BucketHandle,
        key: &str,
        chunk_size: u64,
        source: ByteSource,
        options: &UploadOptions,
    ) -> Result<Vec<TransferSession>, StoreError>;

    async fn download(
        &self,
        bucket: &BucketHandle,
        key: &str,
        options: &DownloadOptions,
    ) -> Result<TransferSession, StoreError>;

    async fn list_objects(
        &self,
        bucket: &BucketHandle,
        options: &ListObjectsOptions,
    ) -> Result<ObjectListing, StoreError>;

    /// Short name for logs.
    fn store_type(&self) -> &'static str;
}
