use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use paperdrop::{Config, WatchPipeline, Worker};
use paperdrop_db::{JobQueue, SeenIndex};
use paperdrop_extract::{DocumentExtractor, SubprocessExtractor};
use paperdrop_logging::{AuditLog, LogConfig};
use paperdrop_sinks::{BlobSink, FsBlobSink, IngestApi, IngestClient, Notifier, SlackNotifier};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "paperdrop",
    about = "Watch a drop folder, extract document text, deliver to blob store and ingestion API"
)]
struct Args {
    /// Path to the TOML config file. Missing file means built-in defaults.
    #[arg(long, env = "PAPERDROP_CONFIG", default_value = "paperdrop.toml")]
    config: PathBuf,

    /// Override the watch directory from the config.
    #[arg(long)]
    watch_dir: Option<PathBuf>,

    /// Mirror full log detail to stderr.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Watch and deliver (the default).
    Run,
    /// Print the pending job count and exit.
    Status,
    /// Write the effective configuration to the config path and exit.
    InitConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::load(&args.config)?
    } else {
        Config::default()
    };
    if let Some(watch_dir) = args.watch_dir {
        config.watch_dir = watch_dir;
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Status => status(&config).await,
        Command::InitConfig => {
            config.save(&args.config)?;
            println!("wrote {}", args.config.display());
            Ok(())
        }
        Command::Run => {
            paperdrop_logging::init_logging(LogConfig {
                app_name: "paperdrop",
                log_dir: config.log_dir.clone(),
                filter: config.log_filter.as_deref(),
                verbose: args.verbose,
            })?;
            run(config).await
        }
    }
}

async fn status(config: &Config) -> Result<()> {
    let pool = paperdrop_db::open(&config.db_path).await?;
    let queue = JobQueue::new(pool);
    println!("pending jobs: {}", queue.count().await?);
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    config.ensure_dirs()?;

    let pool = paperdrop_db::open(&config.db_path).await?;
    let queue = JobQueue::new(pool.clone());
    let seen = SeenIndex::new(pool);

    let audit = Arc::new(AuditLog::new(&config.audit_log));
    let notifier: Arc<dyn Notifier> =
        Arc::new(SlackNotifier::new(config.slack_webhook_url.clone()));
    let extractor: Arc<dyn DocumentExtractor> =
        Arc::new(SubprocessExtractor::new(config.extractor_tools()));
    let blobs: Arc<dyn BlobSink> =
        Arc::new(FsBlobSink::new(&config.blob_root, config.retention_days));
    let api: Arc<dyn IngestApi> = Arc::new(IngestClient::new(
        &config.ingest_endpoint,
        config.ingest_token.clone(),
    )?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker = Worker {
        queue: queue.clone(),
        blobs,
        api,
        notifier: Arc::clone(&notifier),
        audit: Arc::clone(&audit),
        blob_prefix: config.blob_prefix.clone(),
    };
    let worker_shutdown = shutdown_rx.clone();
    let mut worker_handle = tokio::spawn(async move { worker.run(worker_shutdown).await });

    let pipeline = Arc::new(WatchPipeline {
        queue,
        seen,
        extractor,
        notifier,
        audit,
        watch_dir: config.watch_dir.clone(),
        processed_dir: config.processed_dir.clone(),
        failed_dir: config.failed_dir.clone(),
        stability_poll: Duration::from_millis(config.stability_poll_ms),
        stability_max_samples: config.stability_max_samples,
    });
    let mut watcher_handle = tokio::spawn(pipeline.run(shutdown_rx));

    // Either loop finishing before a shutdown request means its store gave
    // up; surface that instead of idling with no delivery happening.
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("shutdown signal received");
        }
        result = &mut worker_handle => {
            result.context("worker task panicked")??;
            bail!("job worker exited unexpectedly");
        }
        result = &mut watcher_handle => {
            result.context("watcher task panicked")??;
            bail!("watcher exited unexpectedly");
        }
    }
    let _ = shutdown_tx.send(true);

    watcher_handle
        .await
        .context("watcher task panicked")??;
    worker_handle
        .await
        .context("worker task panicked")??;
    Ok(())
}
