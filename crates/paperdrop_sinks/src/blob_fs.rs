//! Filesystem blob sink.
//!
//! Stores each object under its key below a root directory, with a JSON
//! sidecar carrying content-type, tags and the retain-until date the object
//! store would otherwise enforce as an object lock.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use tracing::info;

use crate::{BlobSink, SinkError};

pub struct FsBlobSink {
    root: PathBuf,
    retention_days: i64,
}

impl FsBlobSink {
    pub fn new(root: impl Into<PathBuf>, retention_days: i64) -> Self {
        Self {
            root: root.into(),
            retention_days,
        }
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, SinkError> {
        let relative = Path::new(key);
        let traversal = relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::RootDir | Component::Prefix(_)));
        if traversal || key.is_empty() {
            return Err(SinkError::Other(format!("invalid blob key: {key:?}")));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobSink for FsBlobSink {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), SinkError> {
        let path = self.object_path(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;

        let retain_until = Utc::now() + Duration::days(self.retention_days);
        let meta = json!({
            "content_type": content_type,
            "tags": tags,
            "retain_until": retain_until.to_rfc3339(),
        });
        let meta_path = path.with_extension(match path.extension() {
            Some(ext) => format!("{}.meta.json", ext.to_string_lossy()),
            None => "meta.json".to_string(),
        });
        tokio::fs::write(&meta_path, meta.to_string()).await?;

        info!("stored blob {} ({} bytes)", key, bytes.len());
        Ok(())
    }
}
