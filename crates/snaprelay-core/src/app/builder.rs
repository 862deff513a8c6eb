//! AppBuilder - レプリケーションループの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::path::PathBuf;
use std::sync::Arc;

use super::locator::SnapshotLocator;
use super::orchestrator::TransferOrchestrator;
use super::replication_loop::{ReplicationLoop, ReplicationSettings, SnapshotSource};
use crate::config::{Config, StorageBackend};
use crate::impls::{EndpointError, GatewayObjectStore, HttpSnapshotService, InMemoryObjectStore};
use crate::ports::{Clock, IdGenerator, ObjectStore, SnapshotService, SystemClock, UlidGenerator};

/// BuildError はループ構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no object store configured")]
    MissingStore,

    #[error("snapshot creation is enabled but no snapshot service is configured")]
    MissingSnapshotService,

    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    #[error(transparent)]
    Endpoint(#[from] EndpointError),
}

/// AppBuilder は ReplicationLoop を構築
///
/// # 使用例
/// ```ignore
/// let replication = AppBuilder::new(ReplicationSettings::new("acct1", "flureebucket"))
///     .with_snapshot_dir("Snapshots")
///     .with_snapshot_service(Arc::new(service))
///     .with_store(Arc::new(store))
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - build() 時に設定値と依存の揃い方をチェック
/// - 不足があれば BuildError を返す（ループは一度も走らない）
pub struct AppBuilder {
    settings: ReplicationSettings,
    snapshot_dir: PathBuf,
    store: Option<Arc<dyn ObjectStore>>,
    snapshot_service: Option<Arc<dyn SnapshotService>>,
    clock: Arc<dyn Clock>,
    ids: Option<Arc<dyn IdGenerator>>,
    download_dir: Option<PathBuf>,
}

impl AppBuilder {
    pub fn new(settings: ReplicationSettings) -> Self {
        Self {
            settings,
            snapshot_dir: PathBuf::from("Snapshots"),
            store: None,
            snapshot_service: None,
            clock: Arc::new(SystemClock),
            ids: None,
            download_dir: None,
        }
    }

    /// Wire the HTTP snapshot service and the configured store backend.
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        let mut builder =
            Self::new(config.replication_settings()).with_snapshot_dir(&config.snapshot.directory);
        if config.snapshot.create {
            let service = HttpSnapshotService::new(
                &config.snapshot.endpoint,
                config.snapshot.network.clone(),
                config.snapshot.request_timeout,
            )?;
            builder = builder.with_snapshot_service(Arc::new(service));
        }
        if let Some(dir) = &config.replication.download_dir {
            builder = builder.with_download_dir(dir);
        }
        Ok(builder.with_store(store_from_config(config)?))
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.snapshot_dir = dir.into();
        self
    }

    pub fn with_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_snapshot_service(mut self, service: Arc<dyn SnapshotService>) -> Self {
        self.snapshot_service = Some(service);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Defaults to a ULID generator on the builder's clock.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = Some(dir.into());
        self
    }

    /// # 検証
    /// - database / bucket が空でない
    /// - interval > 0、chunk_size > 0
    /// - スナップショット作成が有効なら SnapshotService がある
    pub fn build(self) -> Result<ReplicationLoop, BuildError> {
        let settings = &self.settings;
        if settings.database.trim().is_empty() {
            return Err(BuildError::InvalidSetting("database cannot be empty".into()));
        }
        if settings.bucket.trim().is_empty() {
            return Err(BuildError::InvalidSetting("bucket cannot be empty".into()));
        }
        if settings.interval.is_zero() {
            return Err(BuildError::InvalidSetting("interval must be > 0".into()));
        }
        if settings.chunk_size == Some(0) {
            return Err(BuildError::InvalidSetting("chunk_size must be > 0".into()));
        }
        match &settings.snapshot {
            SnapshotSource::Create if self.snapshot_service.is_none() => {
                return Err(BuildError::MissingSnapshotService);
            }
            SnapshotSource::Existing(token) if token.trim().is_empty() => {
                return Err(BuildError::InvalidSetting("match token cannot be empty".into()));
            }
            _ => {}
        }
        let store = self.store.ok_or(BuildError::MissingStore)?;

        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&self.clock))));
        let orchestrator = match self.download_dir {
            Some(dir) => TransferOrchestrator::new().with_download_dir(dir),
            None => TransferOrchestrator::new(),
        };

        Ok(ReplicationLoop::new(
            self.settings,
            SnapshotLocator::new(self.snapshot_service, self.snapshot_dir),
            store,
            orchestrator,
            self.clock,
            ids,
        ))
    }
}

/// One long-lived store handle for the configured backend.
pub fn store_from_config(config: &Config) -> Result<Arc<dyn ObjectStore>, BuildError> {
    Ok(match config.storage.backend {
        StorageBackend::Gateway => Arc::new(GatewayObjectStore::new(
            &config.storage.credentials(),
            config.storage.request_timeout,
        )?),
        StorageBackend::Memory => {
            Arc::new(InMemoryObjectStore::new().with_bucket(config.storage.bucket.clone()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SnapshotError, SnapshotId};
    use crate::ports::FixedClock;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    struct NoSnapshots;

    #[async_trait]
    impl SnapshotService for NoSnapshots {
        async fn create_snapshot(&self, _database: &str) -> Result<SnapshotId, SnapshotError> {
            Err(SnapshotError::RemoteUnavailable("offline".into()))
        }
    }

    fn settings() -> ReplicationSettings {
        ReplicationSettings::new("acct1", "flureebucket")
    }

    #[test]
    fn build_success() {
        let replication = AppBuilder::new(settings())
            .with_store(Arc::new(InMemoryObjectStore::new()))
            .with_snapshot_service(Arc::new(NoSnapshots))
            .build();
        assert!(replication.is_ok());
    }

    #[test]
    fn build_missing_store() {
        let replication = AppBuilder::new(settings())
            .with_snapshot_service(Arc::new(NoSnapshots))
            .build();
        assert!(matches!(replication, Err(BuildError::MissingStore)));
    }

    #[test]
    fn build_missing_snapshot_service() {
        let replication = AppBuilder::new(settings())
            .with_store(Arc::new(InMemoryObjectStore::new()))
            .build();
        assert!(matches!(replication, Err(BuildError::MissingSnapshotService)));
    }

    #[test]
    fn build_rejects_zero_interval() {
        let mut settings = settings();
        settings.interval = Duration::ZERO;
        let replication = AppBuilder::new(settings)
            .with_store(Arc::new(InMemoryObjectStore::new()))
            .with_snapshot_service(Arc::new(NoSnapshots))
            .build();
        assert!(matches!(replication, Err(BuildError::InvalidSetting(_))));
    }

    #[tokio::test]
    async fn cycle_times_come_from_the_clock() {
        let at = Utc.with_ymd_and_hms(2020, 3, 30, 14, 28, 38).unwrap();
        let replication = AppBuilder::new(settings())
            .with_store(Arc::new(InMemoryObjectStore::new()))
            .with_snapshot_service(Arc::new(NoSnapshots))
            .with_clock(Arc::new(FixedClock::new(at)))
            .build()
            .unwrap();

        let report = replication.run_cycle().await;
        assert_eq!(report.started_at, at);
        assert_eq!(report.finished_at, at);
    }

    #[test]
    fn from_config_wires_the_memory_backend() {
        let config = Config::from_toml(
            r#"
            [snapshot]
            database = "acct1"

            [storage]
            backend = "memory"
            bucket = "flureebucket"
            "#,
        )
        .unwrap();

        let replication = AppBuilder::from_config(&config).unwrap().build().unwrap();
        assert_eq!(replication.settings().bucket, "flureebucket");
    }

    #[test]
    fn from_config_rejects_a_bad_gateway_address() {
        let config = Config::from_toml(
            r#"
            [snapshot]
            database = "acct1"

            [storage]
            api_key = "key"
            secret = "secret"
            satellite_address = "gateway.example.io"
            bucket = "flureebucket"
            "#,
        )
        .unwrap();

        assert!(matches!(
            AppBuilder::from_config(&config),
            Err(BuildError::Endpoint(_))
        ));
    }
}
