//! Status - サイクルごとの結果
//!
//! 一つのサイクルは必ず一つの `CycleReport` を生みます（成功でも失敗でも）。

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{CycleError, CycleId, ErrorKind};

/// What a successful cycle moved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleSummary {
    pub object_key: String,
    pub bytes_transferred: u64,
    pub transfer_duration: Duration,
    /// 1 for a single upload, the part count for a chunked one.
    pub parts: usize,
}

#[derive(Debug)]
pub struct CycleReport {
    pub cycle_id: CycleId,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub result: Result<CycleSummary, CycleError>,
}

impl CycleReport {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    /// `None` for a successful cycle.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.result.as_ref().err().map(CycleError::kind)
    }

    pub fn is_fatal(&self) -> bool {
        self.error_kind() == Some(ErrorKind::Fatal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StoreError;

    fn report(result: Result<CycleSummary, CycleError>) -> CycleReport {
        let now = Utc::now();
        CycleReport {
            cycle_id: CycleId::generate(),
            started_at: now,
            finished_at: now,
            result,
        }
    }

    #[test]
    fn successful_report_has_no_error_kind() {
        let ok = report(Ok(CycleSummary {
            object_key: "1585578518736.avro".into(),
            bytes_transferred: 10,
            transfer_duration: Duration::from_millis(3),
            parts: 1,
        }));
        assert!(ok.succeeded());
        assert_eq!(ok.error_kind(), None);
        assert!(!ok.is_fatal());
    }

    #[test]
    fn auth_failure_report_is_fatal() {
        let failed = report(Err(StoreError::AuthFailure("bad key".into()).into()));
        assert!(!failed.succeeded());
        assert!(failed.is_fatal());
    }
}
