//! cloudsync daemon
//!
//! Run with: cloudsync --access-key KEY --secret-key SECRET

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cloudsync::storage::S3Storage;
use cloudsync::{
    default_watch_path, ChangeWatcher, ProcessGuard, S3Config, Storage, SyncConfig, SyncDaemon,
    Syncer, SystemProcesses, DEFAULT_BUCKET, DEFAULT_ENDPOINT, DEFAULT_PROCESS_NAME,
    DEFAULT_REGION,
};

#[derive(Parser, Debug)]
#[command(name = "cloudsync")]
#[command(about = "Keep game saves in sync with an S3-compatible bucket")]
#[command(version)]
struct Args {
    /// Directory to watch (defaults to the game's save folder)
    #[arg(long, env = "CLOUDSYNC_WATCH_PATH", default_value = "")]
    watch_path: String,

    /// Pause sync while a process with this name is running (empty disables)
    #[arg(long, env = "CLOUDSYNC_PROCESS_NAME", default_value = DEFAULT_PROCESS_NAME)]
    process_name: String,

    /// Directory for backups (defaults to <watch-path>/Backup)
    #[arg(long, env = "CLOUDSYNC_BACKUP_DIR", default_value = "")]
    backup_dir: String,

    /// MinIO/S3 endpoint, host:port or full URL
    #[arg(long, env = "CLOUDSYNC_ENDPOINT", default_value = DEFAULT_ENDPOINT)]
    cloud_endpoint: String,

    /// Cloud storage access key
    #[arg(long, env = "CLOUDSYNC_ACCESS_KEY", default_value = "", hide_env_values = true)]
    access_key: String,

    /// Cloud storage secret key
    #[arg(long, env = "CLOUDSYNC_SECRET_KEY", default_value = "", hide_env_values = true)]
    secret_key: String,

    /// Bucket name in cloud storage
    #[arg(long, env = "CLOUDSYNC_BUCKET", default_value = DEFAULT_BUCKET)]
    bucket_name: String,

    /// Region sent with requests
    #[arg(long, env = "CLOUDSYNC_REGION", default_value = DEFAULT_REGION)]
    region: String,

    /// Modification times closer than this are considered equal
    #[arg(long, env = "CLOUDSYNC_TOLERANCE_MS", default_value = "500")]
    tolerance_ms: u64,

    /// Ignore repeated change events for a file within this window
    #[arg(long, env = "CLOUDSYNC_COOLDOWN_MS", default_value = "1000")]
    cooldown_ms: u64,

    /// Full reconciliation interval in seconds
    #[arg(long, env = "CLOUDSYNC_INTERVAL_SECS", default_value = "10")]
    interval_secs: u64,

    /// Run the initial sync and exit
    #[arg(long)]
    once: bool,

    /// Log as JSON lines
    #[arg(long, env = "CLOUDSYNC_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn to_config(&self) -> cloudsync::Result<SyncConfig> {
        let watch_path = if self.watch_path.trim().is_empty() {
            default_watch_path()?
        } else {
            expand(&self.watch_path)
        };

        let mut s3 = S3Config::new(
            self.cloud_endpoint.clone(),
            self.access_key.clone(),
            self.secret_key.clone(),
            self.bucket_name.clone(),
        );
        s3.region = self.region.clone();

        let mut config = SyncConfig::new(watch_path, s3);
        if !self.backup_dir.trim().is_empty() {
            config.backup_dir = expand(&self.backup_dir);
        }
        config.process_name = Some(self.process_name.clone()).filter(|n| !n.trim().is_empty());
        config.tolerance_ms = self.tolerance_ms;
        config.cooldown_ms = self.cooldown_ms;
        config.interval_secs = self.interval_secs;
        Ok(config)
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.log_json);

    let config = args.to_config().context("invalid configuration")?;
    config.validate().context("invalid configuration")?;

    tracing::info!("starting cloudsync {}", cloudsync::VERSION);

    let storage: Arc<dyn Storage> = Arc::new(
        S3Storage::connect(&config.s3)
            .await
            .context("failed to create storage client")?,
    );
    let syncer = Syncer::from_config(&config, storage)?;

    if args.once {
        let report = syncer.initial_sync().await?;
        tracing::info!(
            "Done: {} uploaded, {} downloaded, {} unchanged, {} failed",
            report.uploaded,
            report.downloaded,
            report.unchanged,
            report.failed
        );
        return Ok(());
    }

    // Watch before the initial pass so edits made during it are not missed
    let watcher = ChangeWatcher::start(
        &config.watch_path,
        syncer.filter().clone(),
        config.cooldown(),
    )
    .context("failed to start file watcher")?;

    if let Err(e) = syncer.initial_sync().await {
        tracing::error!("Initial sync failed, relying on periodic sync: {}", e);
    }

    let guard = ProcessGuard::new(config.process_name.clone(), Box::new(SystemProcesses));
    let daemon = SyncDaemon::new(syncer, watcher, guard, config.interval()).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown requested");

    daemon.stop().await?;
    tracing::info!("closing cloudsync");
    Ok(())
}
