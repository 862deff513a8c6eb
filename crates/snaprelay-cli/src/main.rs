use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use snaprelay_core::app::{AppBuilder, BuildError, TransferOrchestrator, store_from_config};
use snaprelay_core::config::{Config, ConfigError};
use snaprelay_core::domain::{ReplicationError, StoreError};
use snaprelay_core::ports::{DownloadOptions, ListObjectsOptions, ObjectStore};

#[derive(Parser, Debug)]
#[command(name = "snaprelay", version)]
#[command(about = "Replicate database snapshots to an object store")]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "snaprelay.toml")]
    config: PathBuf,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replicate on a fixed interval until SIGINT/SIGTERM
    Run,
    /// Run exactly one cycle
    Once,
    /// List buckets visible to the configured credential
    Buckets,
    /// List objects in the configured bucket
    Objects {
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Download an object from the configured bucket
    Fetch {
        key: String,
        /// Output directory (default: replication.download_dir, then ".")
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Replication(#[from] ReplicationError),

    #[error("cycle failed")]
    CycleFailed,

    #[error("download of {key} failed: {message}")]
    Download { key: String, message: String },
}

/// `RUST_LOG` as given, or `info` when it is unset, empty or unparsable.
fn env_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|v| !v.trim().is_empty())
        .and_then(|v| EnvFilter::try_new(v).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn init_logging(format: LogFormat) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let builder = tracing_subscriber::fmt().with_env_filter(env_filter(rust_log.as_deref()));
    let _ = match format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    if let Err(e) = execute(cli).await {
        error!(error = %e, "snaprelay failed");
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<(), CliError> {
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Run => {
            let replication = AppBuilder::from_config(&config)?.build()?;
            replication.spawn().run_until(shutdown_signal()).await?;
            Ok(())
        }
        Commands::Once => {
            let replication = AppBuilder::from_config(&config)?.build()?;
            let report = replication.run_cycle().await;
            if report.succeeded() {
                Ok(())
            } else {
                Err(CliError::CycleFailed)
            }
        }
        Commands::Buckets => {
            let store = store_from_config(&config)?;
            for bucket in store.list_buckets().await? {
                let created = bucket
                    .created
                    .map(|c| c.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{}", bucket.name, created);
            }
            Ok(())
        }
        Commands::Objects { prefix } => {
            let store = store_from_config(&config)?;
            let bucket = store.resolve_bucket(&config.storage.bucket).await?;
            let options = ListObjectsOptions {
                prefix,
                ..ListObjectsOptions::default()
            };
            let mut listing = store.list_objects(&bucket, &options).await?;
            while let Some(object) = listing.next().await {
                let object = object?;
                let created = object
                    .created
                    .map(|c| c.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string());
                println!("{}\t{}\t{}", object.key, created, object.size);
            }
            Ok(())
        }
        Commands::Fetch { key, out } => {
            let out = out
                .or_else(|| config.replication.download_dir.clone())
                .unwrap_or_else(|| PathBuf::from("."));
            fetch(store_from_config(&config)?, &config.storage.bucket, &key, out).await
        }
    }
}

async fn fetch(
    store: Arc<dyn ObjectStore>,
    bucket: &str,
    key: &str,
    out: PathBuf,
) -> Result<(), CliError> {
    let bucket = store.resolve_bucket(bucket).await?;
    let session = store
        .download(&bucket, key, &DownloadOptions::default())
        .await?;

    let outcome = TransferOrchestrator::new()
        .with_download_dir(&out)
        .run_to_completion(session, |bytes, total| {
            tracing::debug!(object_key = key, bytes_transferred = bytes, total_bytes = total, "download progress");
        })
        .await;

    if outcome.succeeded {
        info!(
            object_key = key,
            bytes_transferred = outcome.bytes_transferred,
            out = %out.display(),
            "object downloaded"
        );
        Ok(())
    } else {
        Err(CliError::Download {
            key: key.to_string(),
            message: outcome.error_message.unwrap_or_default(),
        })
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, stopping after the current cycle");
}
