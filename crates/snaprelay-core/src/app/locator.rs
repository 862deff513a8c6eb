//! SnapshotLocator - スナップショットの作成とローカルファイルの特定

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::{SnapshotArtifact, SnapshotError, SnapshotId};
use crate::ports::SnapshotService;

/// SnapshotLocator はスナップショット作成を依頼し、成果物をディレクトリから探す
///
/// スナップショット作成を使わない構成では `service` は `None`。
#[derive(Clone)]
pub struct SnapshotLocator {
    service: Option<Arc<dyn SnapshotService>>,
    search_dir: PathBuf,
}

impl SnapshotLocator {
    pub fn new(service: Option<Arc<dyn SnapshotService>>, search_dir: impl Into<PathBuf>) -> Self {
        Self {
            service,
            search_dir: search_dir.into(),
        }
    }

    pub fn search_dir(&self) -> &Path {
        &self.search_dir
    }

    pub async fn create_snapshot(&self, database: &str) -> Result<SnapshotId, SnapshotError> {
        match &self.service {
            Some(service) => service.create_snapshot(database).await,
            None => Err(SnapshotError::RemoteUnavailable(
                "snapshot creation is not configured".to_string(),
            )),
        }
    }

    pub async fn locate_artifact(&self, match_token: &str) -> Result<SnapshotArtifact, SnapshotError> {
        locate_artifact(&self.search_dir, match_token).await
    }
}

/// Find the regular file in `dir` whose name contains `match_token` and open it.
///
/// With several candidates the lexicographically largest name wins; snapshot
/// names are epoch-millisecond stamps, so that is the newest one.
pub async fn locate_artifact(dir: &Path, match_token: &str) -> Result<SnapshotArtifact, SnapshotError> {
    let io_err = |source| SnapshotError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let not_found = || SnapshotError::NotFound {
        dir: dir.to_path_buf(),
        token: match_token.to_string(),
    };
    if match_token.is_empty() {
        return Err(not_found());
    }

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut candidates: Vec<(String, PathBuf)> = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains(match_token) {
            candidates.push((name, entry.path()));
        }
    }

    candidates.sort();
    let count = candidates.len();
    let (name, path) = candidates.pop().ok_or_else(not_found)?;
    if count > 1 {
        warn!(
            candidates = count,
            chosen = %name,
            token = match_token,
            "several snapshot files match, using the newest"
        );
    }
    debug!(path = %path.display(), "snapshot artifact located");

    SnapshotArtifact::open(&path)
        .await
        .map_err(|source| SnapshotError::Io { path, source })
}
