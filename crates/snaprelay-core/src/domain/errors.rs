//! Errors - エラー型と分類
//!
//! サイクル境界ですべてのエラーを `ErrorKind` に分類し、ループの振る舞い
//! （次の tick で再試行するか、停止するか）とログレベルを決めます。

use std::path::PathBuf;

use thiserror::Error;

/// ErrorKind は実行エラーの運用分類
///
/// - Transient: 一時的なエラー（次の tick で再試行）
/// - Permanent: 設定ミスなど（次の tick で再試行するが error で記録）
/// - Fatal: 再試行しても無意味（ループを停止）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Fatal,
}

/// Failures of the snapshot side of a cycle (control endpoint and local directory).
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The control endpoint answered 503 or could not be reached.
    #[error("snapshot service unavailable: {0}")]
    RemoteUnavailable(String),

    /// The control endpoint rejected the request.
    #[error("snapshot request for {database} rejected (status {status}): {body}")]
    RemoteError {
        database: String,
        status: u16,
        body: String,
    },

    #[error("no snapshot file matching {token:?} in {}", .dir.display())]
    NotFound { dir: PathBuf, token: String },

    #[error("failed to read snapshot {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SnapshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapshotError::RemoteUnavailable(_) => ErrorKind::Transient,
            SnapshotError::RemoteError { .. }
            | SnapshotError::NotFound { .. }
            | SnapshotError::Io { .. } => ErrorKind::Permanent,
        }
    }

    pub fn classification(&self) -> &'static str {
        match self {
            SnapshotError::RemoteUnavailable(_) => "remote_unavailable",
            SnapshotError::RemoteError { .. } => "remote_error",
            SnapshotError::NotFound { .. } => "not_found",
            SnapshotError::Io { .. } => "io_error",
        }
    }
}

/// Failures reported by an `ObjectStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("credential rejected by object store: {0}")]
    AuthFailure(String),

    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("object already exists: {bucket}/{key}")]
    ObjectExists { bucket: String, key: String },

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unexpected response from object store (status {status}): {message}")]
    Protocol { status: u16, message: String },

    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::AuthFailure(_) => ErrorKind::Fatal,
            StoreError::Network(_) | StoreError::QuotaExceeded(_) => ErrorKind::Transient,
            StoreError::BucketNotFound(_)
            | StoreError::ObjectExists { .. }
            | StoreError::ObjectNotFound { .. }
            | StoreError::InvalidRequest(_)
            | StoreError::Protocol { .. }
            | StoreError::Io(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn classification(&self) -> &'static str {
        match self {
            StoreError::AuthFailure(_) => "auth_failure",
            StoreError::BucketNotFound(_) => "bucket_not_found",
            StoreError::ObjectExists { .. } => "object_exists",
            StoreError::ObjectNotFound { .. } => "object_not_found",
            StoreError::Network(_) => "network_error",
            StoreError::QuotaExceeded(_) => "quota_exceeded",
            StoreError::InvalidRequest(_) => "invalid_request",
            StoreError::Protocol { .. } => "protocol_error",
            StoreError::Io(_) => "io_error",
        }
    }
}

/// Everything that can end a replication cycle early.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The store accepted the upload but the transfer did not complete.
    #[error("transfer of {key} failed: {message}")]
    Transfer { key: String, message: String },

    #[error("uploaded object {key} failed verification: expected {expected} bytes, found {found:?}")]
    Verification {
        key: String,
        expected: u64,
        found: Option<u64>,
    },
}

impl CycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CycleError::Snapshot(e) => e.kind(),
            CycleError::Store(e) => e.kind(),
            CycleError::Transfer { .. } => ErrorKind::Transient,
            CycleError::Verification { .. } => ErrorKind::Permanent,
        }
    }

    pub fn classification(&self) -> &'static str {
        match self {
            CycleError::Snapshot(e) => e.classification(),
            CycleError::Store(e) => e.classification(),
            CycleError::Transfer { .. } => "transfer_failed",
            CycleError::Verification { .. } => "verification_failed",
        }
    }
}

/// Why the replication loop stopped on its own.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("replication stopped after fatal error in {cycle}: {source}")]
    Fatal {
        cycle: String,
        #[source]
        source: CycleError,
    },

    #[error("replication task ended abnormally: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(StoreError::AuthFailure("bad key".into()), ErrorKind::Fatal, "auth_failure")]
    #[case(StoreError::Network("reset".into()), ErrorKind::Transient, "network_error")]
    #[case(StoreError::QuotaExceeded("full".into()), ErrorKind::Transient, "quota_exceeded")]
    #[case(StoreError::BucketNotFound("b".into()), ErrorKind::Permanent, "bucket_not_found")]
    fn store_errors_are_classified(
        #[case] err: StoreError,
        #[case] kind: ErrorKind,
        #[case] label: &str,
    ) {
        assert_eq!(err.kind(), kind);
        assert_eq!(err.classification(), label);
        assert_eq!(err.is_retryable(), kind == ErrorKind::Transient);
    }

    #[test]
    fn remote_unavailable_is_transient_and_remote_error_is_not() {
        let unavailable = SnapshotError::RemoteUnavailable("503".into());
        let rejected = SnapshotError::RemoteError {
            database: "acct1".into(),
            status: 400,
            body: "bad db".into(),
        };

        assert_eq!(unavailable.kind(), ErrorKind::Transient);
        assert_eq!(rejected.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn cycle_error_delegates_to_its_source() {
        let err = CycleError::from(StoreError::AuthFailure("nope".into()));
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(err.classification(), "auth_failure");

        let err = CycleError::from(SnapshotError::NotFound {
            dir: PathBuf::from("Snapshots"),
            token: "1585578518736".into(),
        });
        assert_eq!(err.classification(), "not_found");
        assert!(err.to_string().contains("1585578518736"));
    }
}
