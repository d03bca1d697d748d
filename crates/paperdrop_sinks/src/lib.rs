//! Delivery sinks and the notifier.
//!
//! The worker loop only sees the [`BlobSink`], [`IngestApi`] and
//! [`Notifier`] traits; the concrete implementations here are the filesystem
//! blob store, the reqwest-based ingestion client, and the Slack-style
//! webhook notifier.

pub mod blob_fs;
pub mod ingest;
pub mod notify;

pub use blob_fs::FsBlobSink;
pub use ingest::{IngestApi, IngestClient};
pub use notify::{Notifier, NotifyContext, SlackNotifier};

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

/// Failure of one delivery attempt. The retry policy treats transient and
/// permanent failures alike (a 4xx retries up to the cap before escalating);
/// the variants exist so logs can tell them apart.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("request failed with status {status}: {body}")]
    BadStatus { status: u16, body: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// Durable byte storage with tags and retention metadata.
#[async_trait]
pub trait BlobSink: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), SinkError>;
}
