//! Configuration file (`snaprelay.toml`)
//!
//! ```toml
//! [snapshot]
//! database = "acct1"
//! directory = "Snapshots"
//!
//! [storage]
//! backend = "gateway"
//! satellite_address = "https://gateway.example.io"
//! bucket = "flureebucket"
//!
//! [replication]
//! interval = "5s"
//! ```
//!
//! Secrets and targets can come from the environment instead
//! (`SNAPRELAY_API_KEY`, `SNAPRELAY_SECRET`, `SNAPRELAY_SATELLITE_ADDRESS`,
//! `SNAPRELAY_BUCKET`, `SNAPRELAY_DATABASE`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::app::{ReplicationSettings, SnapshotSource};
use crate::impls::{DEFAULT_NETWORK, DEFAULT_SNAPSHOT_ENDPOINT, GatewayCredentials};
use crate::ports::UploadOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

// =============================================================================
// Default value functions for serde
// =============================================================================

fn default_endpoint() -> String {
    DEFAULT_SNAPSHOT_ENDPOINT.to_string()
}

fn default_network() -> String {
    DEFAULT_NETWORK.to_string()
}

fn default_directory() -> PathBuf {
    PathBuf::from("Snapshots")
}

const fn default_true() -> bool {
    true
}

const fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_interval() -> Duration {
    Duration::from_secs(5)
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    #[serde(default)]
    pub database: String,

    /// Base URL of the database control endpoint
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_network")]
    pub network: String,

    /// Directory the database writes snapshot files to
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Request a fresh snapshot each cycle. When false, `match_token` is used.
    #[serde(default = "default_true")]
    pub create: bool,

    #[serde(default)]
    pub match_token: Option<String>,

    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            database: String::new(),
            endpoint: default_endpoint(),
            network: default_network(),
            directory: default_directory(),
            create: true,
            match_token: None,
            request_timeout: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Gateway,
    /// In-process store; nothing leaves the machine.
    Memory,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub secret: String,

    #[serde(default)]
    pub satellite_address: String,

    #[serde(default)]
    pub bucket: String,

    #[serde(default = "default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            api_key: String::new(),
            secret: String::new(),
            satellite_address: String::new(),
            bucket: String::new(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl StorageConfig {
    pub fn credentials(&self) -> GatewayCredentials {
        GatewayCredentials {
            api_key: self.api_key.clone(),
            secret: self.secret.clone(),
            satellite_address: self.satellite_address.clone(),
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("backend", &self.backend)
            .field("api_key", &self.api_key)
            .field("secret", &"<redacted>")
            .field("satellite_address", &self.satellite_address)
            .field("bucket", &self.bucket)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    #[serde(default = "default_interval", with = "duration_str")]
    pub interval: Duration,

    /// Upload as a multipart of this many bytes per part
    #[serde(default)]
    pub chunk_size: Option<u64>,

    #[serde(default = "default_true")]
    pub overwrite: bool,

    /// List the bucket after each upload and check key and size
    #[serde(default)]
    pub verify: bool,

    /// Where `fetch` writes downloaded objects
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            chunk_size: None,
            overwrite: true,
            verify: false,
            download_dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub snapshot: SnapshotConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub replication: ReplicationConfig,
}

impl Config {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Read `path`, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::from_toml(&text)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Overwrite secrets and targets from `lookup` (normally the process env).
    /// Empty values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("SNAPRELAY_API_KEY") {
            self.storage.api_key = v;
        }
        if let Some(v) = get("SNAPRELAY_SECRET") {
            self.storage.secret = v;
        }
        if let Some(v) = get("SNAPRELAY_SATELLITE_ADDRESS") {
            self.storage.satellite_address = v;
        }
        if let Some(v) = get("SNAPRELAY_BUCKET") {
            self.storage.bucket = v;
        }
        if let Some(v) = get("SNAPRELAY_DATABASE") {
            self.snapshot.database = v;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |message: &str| Err(ConfigError::Invalid(message.to_string()));

        if self.snapshot.database.trim().is_empty() {
            return invalid("snapshot.database cannot be empty");
        }
        if self.storage.bucket.trim().is_empty() {
            return invalid("storage.bucket cannot be empty");
        }
        if !self.snapshot.create
            && self
                .snapshot
                .match_token
                .as_deref()
                .is_none_or(|t| t.trim().is_empty())
        {
            return invalid("snapshot.match_token is required when snapshot.create is false");
        }
        if self.storage.backend == StorageBackend::Gateway {
            if self.storage.api_key.is_empty() || self.storage.secret.is_empty() {
                return invalid("storage.api_key and storage.secret are required for the gateway backend");
            }
            if self.storage.satellite_address.trim().is_empty() {
                return invalid("storage.satellite_address is required for the gateway backend");
            }
        }
        if self.replication.interval.is_zero() {
            return invalid("replication.interval must be > 0");
        }
        if self.replication.chunk_size == Some(0) {
            return invalid("replication.chunk_size must be > 0");
        }
        Ok(())
    }

    pub fn replication_settings(&self) -> ReplicationSettings {
        let snapshot = if self.snapshot.create {
            SnapshotSource::Create
        } else {
            SnapshotSource::Existing(self.snapshot.match_token.clone().unwrap_or_default())
        };
        ReplicationSettings {
            database: self.snapshot.database.clone(),
            bucket: self.storage.bucket.clone(),
            interval: self.replication.interval,
            snapshot,
            upload: UploadOptions {
                overwrite: self.replication.overwrite,
                ..UploadOptions::default()
            },
            chunk_size: self.replication.chunk_size,
            verify: self.replication.verify,
        }
    }
}

/// `"5s"`, `"250ms"`, `"1m 30s"` via humantime.
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(s.trim()).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    const FULL: &str = r#"
        [snapshot]
        database = "acct1"
        endpoint = "http://fluree:8090"
        directory = "/var/lib/fluree/Snapshots"

        [storage]
        api_key = "key"
        secret = "secret"
        satellite_address = "https://gateway.example.io"
        bucket = "flureebucket"

        [replication]
        interval = "30s"
        chunk_size = 1048576
        verify = true
    "#;

    #[test]
    fn parses_a_full_file() {
        let config = Config::from_toml(FULL).unwrap();

        assert_eq!(config.snapshot.database, "acct1");
        assert_eq!(config.snapshot.network, "local");
        assert_eq!(config.snapshot.request_timeout, Duration::from_secs(30));
        assert_eq!(config.storage.backend, StorageBackend::Gateway);
        assert_eq!(config.replication.interval, Duration::from_secs(30));
        assert_eq!(config.replication.chunk_size, Some(1_048_576));
        assert!(config.replication.overwrite);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn defaults_match_the_documented_values() {
        let config = Config::default();
        assert_eq!(config.snapshot.endpoint, "http://localhost:8080");
        assert_eq!(config.snapshot.directory, PathBuf::from("Snapshots"));
        assert!(config.snapshot.create);
        assert_eq!(config.replication.interval, Duration::from_secs(5));
    }

    #[test]
    fn settings_follow_the_config() {
        let settings = Config::from_toml(FULL).unwrap().replication_settings();
        assert_eq!(settings.database, "acct1");
        assert_eq!(settings.bucket, "flureebucket");
        assert_eq!(settings.snapshot, SnapshotSource::Create);
        assert_eq!(settings.chunk_size, Some(1_048_576));
        assert!(settings.verify);
    }

    #[test]
    fn env_overrides_replace_secrets() {
        let mut config = Config::from_toml(FULL).unwrap();
        let env: HashMap<&str, &str> = [
            ("SNAPRELAY_SECRET", "from-env"),
            ("SNAPRELAY_BUCKET", "otherbucket"),
            ("SNAPRELAY_API_KEY", ""),
        ]
        .into_iter()
        .collect();

        config.apply_env_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.storage.secret, "from-env");
        assert_eq!(config.storage.bucket, "otherbucket");
        assert_eq!(config.storage.api_key, "key");
    }

    #[test]
    fn secret_is_redacted_in_debug() {
        let config = Config::from_toml(FULL).unwrap();
        let printed = format!("{:?}", config.storage);
        assert!(!printed.contains("\"secret\""));
        assert!(printed.contains("<redacted>"));
    }

    #[rstest]
    #[case("database", r#"[storage]
        backend = "memory"
        bucket = "b""#)]
    #[case("bucket", r#"[snapshot]
        database = "acct1"
        [storage]
        backend = "memory""#)]
    #[case("api_key", r#"[snapshot]
        database = "acct1"
        [storage]
        bucket = "b""#)]
    #[case("match_token", r#"[snapshot]
        database = "acct1"
        create = false
        [storage]
        backend = "memory"
        bucket = "b""#)]
    #[case("interval", r#"[snapshot]
        database = "acct1"
        [storage]
        backend = "memory"
        bucket = "b"
        [replication]
        interval = "0s""#)]
    #[case("chunk_size", r#"[snapshot]
        database = "acct1"
        [storage]
        backend = "memory"
        bucket = "b"
        [replication]
        chunk_size = 0"#)]
    fn validation_names_the_bad_field(#[case] field: &str, #[case] text: &str) {
        let err = Config::from_toml(text).unwrap().validate().unwrap_err();
        assert!(err.to_string().contains(field), "{err}");
    }

    #[test]
    fn memory_backend_needs_no_credentials() {
        let config = Config::from_toml(
            r#"
            [snapshot]
            database = "acct1"
            create = false
            match_token = "1585578518736"

            [storage]
            backend = "memory"
            bucket = "flureebucket"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.replication_settings().snapshot,
            SnapshotSource::Existing("1585578518736".into())
        );
    }

    #[test]
    fn bad_duration_is_a_parse_error() {
        let err = Config::from_toml("[replication]\ninterval = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
