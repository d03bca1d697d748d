//! Shared logging utilities for the Paperdrop ingestor.
//!
//! Local structured logs carry full error detail; anything that leaves the
//! process (notifications) must go through [`redact`] first.

pub mod audit;
pub mod redact;
pub mod rolling;

pub use audit::AuditLog;
pub use redact::redact;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use rolling::RollingWriter;

const DEFAULT_LOG_FILTER: &str = "paperdrop=info,paperdrop_db=info,paperdrop_sinks=info";
const MAX_LOG_FILES: usize = 5;
const MAX_LOG_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Logging configuration for the Paperdrop binary.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub log_dir: PathBuf,
    /// Filter directives from the config file. `RUST_LOG` wins over this.
    pub filter: Option<&'a str>,
    pub verbose: bool,
}

/// Initialize tracing with a rolling file writer and stderr output.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    std::fs::create_dir_all(&config.log_dir).with_context(|| {
        format!("Failed to create log directory: {}", config.log_dir.display())
    })?;
    let file_writer = RollingWriter::new(
        config.log_dir.clone(),
        config.app_name,
        MAX_LOG_FILES,
        MAX_LOG_FILE_SIZE,
    )
    .context("Failed to initialize rolling log writer")?;

    let default_filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.filter.unwrap_or(DEFAULT_LOG_FILTER)))
    };
    let file_filter = default_filter();
    let console_filter = if config.verbose {
        default_filter()
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(file_filter),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .init();

    Ok(())
}
