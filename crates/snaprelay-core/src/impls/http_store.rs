//! GatewayObjectStore - HTTP ゲートウェイ越しのオブジェクトストア
//!
//! # ワイヤプロトコル
//!
//! | Operation | Request |
//! |-----------|---------|
//! | list buckets | `GET /buckets` |
//! | resolve bucket | `GET /buckets/{b}` |
//! | object exists | `HEAD /buckets/{b}/objects/{k}` (overwrite off) |
//! | upload | `PUT /buckets/{b}/objects/{k}` |
//! | download | `GET /buckets/{b}/objects/{k}` (+ `Range`) |
//! | list objects | `GET /buckets/{b}/objects?prefix=&limit=&cursor=` |
//! | multipart | `POST /buckets/{b}/uploads`, `PUT .../parts/{n}`, `POST .../commit`, `DELETE` |
//!
//! Every request carries basic auth `api_key:secret`.
//!
//! # Status mapping
//!
//! | Status | Error |
//! |--------|-------|
//! | 401 / 403 | `AuthFailure` |
//! | 404 | `BucketNotFound` or `ObjectNotFound` (by call site) |
//! | 409 / 412 | `ObjectExists` |
//! | 429 / 507 | `QuotaExceeded` |
//! | 5xx, transport | `Network` |
//! | other | `Protocol` |

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, IF_NONE_MATCH, RANGE};
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use super::endpoint::{self, EndpointError};
use super::multipart::{self, ChunkRange, MultipartTarget};
use crate::domain::{
    BucketHandle, ByteSource, ObjectInfo, ObjectListing, ProgressReporter, StoreError,
    TransferDirection, TransferSession,
};
use crate::ports::{DownloadOptions, ListObjectsOptions, ObjectStore, UploadOptions};

/// Access credentials for the gateway.
#[derive(Clone)]
pub struct GatewayCredentials {
    pub api_key: String,
    pub secret: String,
    pub satellite_address: String,
}

impl fmt::Debug for GatewayCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayCredentials")
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .field("satellite_address", &self.satellite_address)
            .finish()
    }
}

/// What a 404 means at the call site.
#[derive(Debug, Clone)]
enum Missing {
    Bucket(String),
    Object { bucket: String, key: String },
}

fn map_status(status: StatusCode, message: String, missing: Missing) -> StoreError {
    let message = if message.trim().is_empty() {
        status.to_string()
    } else {
        message
    };
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StoreError::AuthFailure(message),
        StatusCode::NOT_FOUND => match missing {
            Missing::Bucket(name) => StoreError::BucketNotFound(name),
            Missing::Object { bucket, key } => StoreError::ObjectNotFound { bucket, key },
        },
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => match missing {
            Missing::Object { bucket, key } => StoreError::ObjectExists { bucket, key },
            Missing::Bucket(bucket) => StoreError::ObjectExists {
                bucket,
                key: String::new(),
            },
        },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::INSUFFICIENT_STORAGE => {
            StoreError::QuotaExceeded(format!("HTTP {status}: {message}"))
        }
        s if s.is_server_error() => StoreError::Network(format!("HTTP {status}: {message}")),
        _ => StoreError::Protocol {
            status: status.as_u16(),
            message,
        },
    }
}

async fn error_for(response: Response, missing: Missing) -> StoreError {
    let status = response.status();
    let message = response.text().await.unwrap_or_default();
    map_status(status, message, missing)
}

fn transport_error(e: reqwest::Error) -> StoreError {
    StoreError::Network(e.to_string())
}

async fn check(response: Response, missing: Missing) -> Result<Response, StoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(error_for(response, missing).await)
    }
}

#[derive(Deserialize)]
struct BucketList {
    buckets: Vec<BucketHandle>,
}

#[derive(Deserialize)]
struct ObjectPage {
    objects: Vec<ObjectInfo>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Serialize)]
struct BeginMultipart<'a> {
    key: &'a str,
}

#[derive(Deserialize)]
struct MultipartStarted {
    upload_id: String,
}

#[derive(Serialize)]
struct CommitMultipart {
    parts: Vec<usize>,
}

/// GatewayObjectStore は reqwest クライアントを一つだけ持ち、全サイクルで共有する
#[derive(Clone)]
pub struct GatewayObjectStore {
    base_url: Url,
    http: Client,
    api_key: String,
    secret: String,
}

impl fmt::Debug for GatewayObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayObjectStore")
            .field("base_url", &self.base_url.as_str())
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl GatewayObjectStore {
    pub fn new(credentials: &GatewayCredentials, timeout: Duration) -> Result<Self, EndpointError> {
        Self::with_http_client(credentials, endpoint::http_client(timeout)?)
    }

    pub fn with_http_client(
        credentials: &GatewayCredentials,
        http: Client,
    ) -> Result<Self, EndpointError> {
        Ok(Self {
            base_url: endpoint::parse_base_url(&credentials.satellite_address)?,
            http,
            api_key: credentials.api_key.clone(),
            secret: credentials.secret.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        endpoint::join_segments(&self.base_url, segments)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.api_key, Some(&self.secret))
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool, StoreError> {
        let url = self.url(&["buckets", bucket, "objects", key]);
        let response = self
            .request(Method::HEAD, url)
            .send()
            .await
            .map_err(transport_error)?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check(response, Missing::Bucket(bucket.to_string())).await?;
        Ok(true)
    }

    async fn ensure_writable(
        &self,
        bucket: &BucketHandle,
        key: &str,
        options: &UploadOptions,
    ) -> Result<(), StoreError> {
        if !options.overwrite && self.object_exists(&bucket.name, key).await? {
            return Err(StoreError::ObjectExists {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn fetch_page(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ObjectPage, StoreError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(prefix) = prefix {
            query.push(("prefix", prefix.to_string()));
        }
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }

        let url = self.url(&["buckets", bucket, "objects"]);
        let response = self
            .request(Method::GET, url)
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;
        check(response, Missing::Bucket(bucket.to_string()))
            .await?
            .json::<ObjectPage>()
            .await
            .map_err(|e| StoreError::Protocol {
                status: 200,
                message: format!("invalid object page: {e}"),
            })
    }
}

/// Content-Length is only a hint for the download buffer.
const MAX_PREALLOCATION: u64 = 8 * 1024 * 1024;

/// `Range` value for a download, `None` for the whole object.
fn range_header(options: &DownloadOptions) -> Option<String> {
    match options.length {
        Some(len) => {
            let end = options.offset.saturating_add(len.saturating_sub(1));
            Some(format!("bytes={}-{end}", options.offset))
        }
        None if options.offset > 0 => Some(format!("bytes={}-", options.offset)),
        None => None,
    }
}

/// Stream `source` as a request body, reporting progress per chunk.
fn progress_body(
    mut source: ByteSource,
    step: usize,
    reporter: ProgressReporter,
    sent: Arc<AtomicU64>,
) -> Body {
    let stream = async_stream::stream! {
        loop {
            match source.read_chunk(step).await {
                Ok(Some(chunk)) => {
                    let total = sent.fetch_add(chunk.len() as u64, Ordering::AcqRel)
                        + chunk.len() as u64;
                    reporter.progress(total);
                    yield Ok::<Vec<u8>, std::io::Error>(chunk);
                }
                Ok(None) => break,
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    };
    Body::wrap_stream(stream)
}

#[async_trait]
impl ObjectStore for GatewayObjectStore {
    async fn list_buckets(&self) -> Result<Vec<BucketHandle>, StoreError> {
        let response = self
            .request(Method::GET, self.url(&["buckets"]))
            .send()
            .await
            .map_err(transport_error)?;
        let list: BucketList = check(response, Missing::Bucket(String::new()))
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Protocol {
                status: 200,
                message: format!("invalid bucket list: {e}"),
            })?;
        Ok(list.buckets)
    }

    async fn resolve_bucket(&self, name: &str) -> Result<BucketHandle, StoreError> {
        let response = self
            .request(Method::GET, self.url(&["buckets", name]))
            .send()
            .await
            .map_err(transport_error)?;
        let handle: BucketHandle = check(response, Missing::Bucket(name.to_string()))
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Protocol {
                status: 200,
                message: format!("invalid bucket: {e}"),
            })?;
        debug!(bucket = %handle.name, "bucket resolved");
        Ok(handle)
    }

    async fn upload(
        &self,
        bucket: &BucketHandle,
        key: &str,
        source: ByteSource,
        options: &UploadOptions,
    ) -> Result<TransferSession, StoreError> {
        self.ensure_writable(bucket, key, options).await?;

        let total = source.len();
        let mut request = self
            .request(Method::PUT, self.url(&["buckets", &bucket.name, "objects", key]))
            .header(CONTENT_LENGTH, total);
        if !options.overwrite {
            request = request.header(IF_NONE_MATCH, "*");
        }
        if let Some(content_type) = &options.content_type {
            request = request.header(CONTENT_TYPE, content_type.as_str());
        }
        let missing = Missing::Object {
            bucket: bucket.name.clone(),
            key: key.to_string(),
        };
        let step = options.buffer_size;

        Ok(TransferSession::new(
            key,
            TransferDirection::Upload,
            total,
            move |reporter| async move {
                let sent = Arc::new(AtomicU64::new(0));
                let body = progress_body(source, step, reporter.clone(), Arc::clone(&sent));
                let result = match request.body(body).send().await {
                    Ok(response) => check(response, missing).await.map(|_| ()),
                    Err(e) => Err(transport_error(e)),
                };
                let sent = sent.load(Ordering::Acquire);
                match result {
                    Ok(()) => reporter.completed(sent),
                    Err(e) => reporter.failed(sent, e.to_string()),
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
        let plan = multipart::plan_chunks(source.len(), chunk_size)?;
        self.ensure_writable(bucket, key, options).await?;

        let response = self
            .request(Method::POST, self.url(&["buckets", &bucket.name, "uploads"]))
            .json(&BeginMultipart { key })
            .send()
            .await
            .map_err(transport_error)?;
        let started: MultipartStarted = check(response, Missing::Bucket(bucket.name.clone()))
            .await?
            .json()
            .await
            .map_err(|e| StoreError::Protocol {
                status: 200,
                message: format!("invalid multipart response: {e}"),
            })?;
        debug!(object_key = key, upload_id = %started.upload_id, parts = plan.len(), "multipart upload started");

        let target = Arc::new(GatewayMultipart {
            store: self.clone(),
            bucket: bucket.name.clone(),
            key: key.to_string(),
            upload_id: started.upload_id,
        });
        Ok(multipart::part_sessions(key, plan, source, target))
    }

    /// Sends the request and checks the status up front so a missing key
    /// fails here. Only the body is streamed by the session.
    async fn download(
        &self,
        bucket: &BucketHandle,
        key: &str,
        options: &DownloadOptions,
    ) -> Result<TransferSession, StoreError> {
        if options.length == Some(0) {
            return Ok(TransferSession::new(
                key,
                TransferDirection::Download,
                0,
                |reporter| async move { reporter.completed_with_payload(0, Vec::new()) },
            ));
        }

        let mut request =
            self.request(Method::GET, self.url(&["buckets", &bucket.name, "objects", key]));
        if let Some(range) = range_header(options) {
            request = request.header(RANGE, range);
        }

        let response = request.send().await.map_err(transport_error)?;
        let response = if response.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            // offset past the end: nothing to read
            None
        } else {
            let missing = Missing::Object {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            };
            Some(check(response, missing).await?)
        };
        let total = response
            .as_ref()
            .and_then(Response::content_length)
            .unwrap_or(0);

        Ok(TransferSession::new(
            key,
            TransferDirection::Download,
            total,
            move |reporter| async move {
                let Some(response) = response else {
                    reporter.completed_with_payload(0, Vec::new());
                    return;
                };

                let mut data = Vec::with_capacity(total.min(MAX_PREALLOCATION) as usize);
                let mut body = response.bytes_stream();
                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(bytes) => {
                            data.extend_from_slice(&bytes);
                            reporter.progress(data.len() as u64);
                        }
                        Err(e) => {
                            reporter.failed(data.len() as u64, transport_error(e).to_string());
                            return;
                        }
                    }
                }
                let received = data.len() as u64;
                reporter.completed_with_payload(received, data);
            },
        ))
    }

    async fn list_objects(
        &self,
        bucket: &BucketHandle,
        options: &ListObjectsOptions,
    ) -> Result<ObjectListing, StoreError> {
        let store = self.clone();
        let bucket = bucket.name.clone();
        let prefix = options.prefix.clone();
        let limit = options.page_size.max(1);

        let stream = async_stream::stream! {
            let mut cursor: Option<String> = None;
            loop {
                match store
                    .fetch_page(&bucket, prefix.as_deref(), limit, cursor.as_deref())
                    .await
                {
                    Ok(page) => {
                        for object in page.objects {
                            yield Ok::<ObjectInfo, StoreError>(object);
                        }
                        match page.next_cursor {
                            Some(next) if !next.is_empty() => cursor = Some(next),
                            _ => break,
                        }
                    }
                    Err(e) => {
                        yield Err(e);
                        break;
                    }
                }
            }
        };
        Ok(ObjectListing::new(stream))
    }

    fn store_type(&self) -> &'static str {
        "gateway"
    }
}

struct GatewayMultipart {
    store: GatewayObjectStore,
    bucket: String,
    key: String,
    upload_id: String,
}

#[async_trait]
impl MultipartTarget for GatewayMultipart {
    async fn put_part(&self, part: ChunkRange, data: Vec<u8>) -> Result<(), StoreError> {
        let index = part.index.to_string();
        let url = self.store.url(&[
            "buckets",
            &self.bucket,
            "uploads",
            &self.upload_id,
            "parts",
            &index,
        ]);
        let response = self
            .store
            .request(Method::PUT, url)
            .body(data)
            .send()
            .await
            .map_err(transport_error)?;
        check(response, Missing::Bucket(self.bucket.clone())).await?;
        Ok(())
    }

    async fn commit(&self, parts: usize) -> Result<(), StoreError> {
        let url = self
            .store
            .url(&["buckets", &self.bucket, "uploads", &self.upload_id, "commit"]);
        let response = self
            .store
            .request(Method::POST, url)
            .json(&CommitMultipart {
                parts: (0..parts).collect(),
            })
            .send()
            .await
            .map_err(transport_error)?;
        check(
            response,
            Missing::Object {
                bucket: self.bucket.clone(),
                key: self.key.clone(),
            },
        )
        .await?;
        Ok(())
    }

    async fn abort(&self) {
        let url = self
            .store
            .url(&["buckets", &self.bucket, "uploads", &self.upload_id]);
        let result = match self.store.request(Method::DELETE, url).send().await {
            Ok(response) => check(response, Missing::Bucket(self.bucket.clone()))
                .await
                .map(|_| ()),
            Err(e) => Err(transport_error(e)),
        };
        if let Err(e) = result {
            warn!(
                object_key = %self.key,
                upload_id = %self.upload_id,
                error = %e,
                "failed to abort multipart upload"
            );
        }
    }
}
