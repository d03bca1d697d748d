//! Retry scheduler / worker loop.
//!
//! One job in flight at a time; the lease window in the store is sized for
//! that. Dispatch failures never crash the loop - they reschedule the job
//! with exponential backoff. Only storage-level failures propagate out.

use anyhow::{Context, Result};
use chrono::Utc;
use paperdrop_db::queue::backoff_secs;
use paperdrop_db::{JobQueue, QueuedJob};
use paperdrop_extract::DocumentPayload;
use paperdrop_logging::{redact, AuditLog};
use paperdrop_sinks::{BlobSink, IngestApi, Notifier, NotifyContext};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::jobs::{blob_key, JobPayload};

/// Failed dispatches before a job escalates to a terminal-failure
/// notification. The row is kept and retried at the capped interval.
pub const MAX_ATTEMPTS: i64 = 10;

/// Sleep between polls when nothing is due. Bounds shutdown latency.
const IDLE_POLL: Duration = Duration::from_millis(250);

pub struct Worker {
    pub queue: JobQueue,
    pub blobs: Arc<dyn BlobSink>,
    pub api: Arc<dyn IngestApi>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<AuditLog>,
    pub blob_prefix: String,
}

impl Worker {
    /// Run until the shutdown flag flips. The current dispatch finishes
    /// before the flag is honored; a claim interrupted by process death is
    /// covered by the lease expiry in the store.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!("job worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            if !self.run_once().await? {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
        info!("job worker stopped");
        Ok(())
    }

    /// Claim and dispatch at most one due job.
    ///
    /// Returns `Ok(true)` if a job was claimed, `Ok(false)` if nothing was
    /// due. Errors are storage failures only.
    pub async fn run_once(&self) -> Result<bool> {
        let Some(job) = self.queue.claim_next_due().await? else {
            return Ok(false);
        };

        match self.dispatch(&job).await {
            Ok(()) => {
                self.queue.complete(job.id).await?;
                info!("job {} done (kind={})", job.id, job.kind);
            }
            Err(err) => {
                let attempts = job.attempts + 1;
                self.queue.fail(job.id, attempts).await?;
                self.report_failure(&job, attempts, &err);
            }
        }
        Ok(true)
    }

    async fn dispatch(&self, job: &QueuedJob) -> Result<()> {
        let payload: JobPayload =
            serde_json::from_str(&job.payload).context("malformed job payload")?;
        match payload {
            JobPayload::StoreOriginal {
                filename,
                content_type,
                bytes,
                tags,
            } => {
                self.put_blob("original", &filename, &content_type, &bytes, &tags, job)
                    .await
            }
            JobPayload::StoreDerived {
                filename,
                content_type,
                bytes,
                tags,
            } => {
                self.put_blob("extracted", &filename, &content_type, &bytes, &tags, job)
                    .await
            }
            JobPayload::PostDocument { document } => self.post_document(&document).await,
        }
    }

    async fn put_blob(
        &self,
        kind: &str,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
        tags: &std::collections::BTreeMap<String, String>,
        job: &QueuedJob,
    ) -> Result<()> {
        let key = blob_key(&self.blob_prefix, kind, filename, Utc::now());
        self.blobs.put(&key, bytes, content_type, tags).await?;
        self.audit.append(
            "blob_put",
            json!({"key": key, "sha256": job.content_hash, "status": "ok"}),
        );
        Ok(())
    }

    async fn post_document(&self, document: &DocumentPayload) -> Result<()> {
        self.api.post_document(document).await?;
        self.audit.append(
            "api_post",
            json!({
                "filename": document.filename,
                "sha256": document.sha256,
                "status": "ok",
            }),
        );
        Ok(())
    }

    fn report_failure(&self, job: &QueuedJob, attempts: i64, err: &anyhow::Error) {
        let backoff = backoff_secs(attempts);
        let detail = redact(&format!("{err:#}"));
        if attempts == MAX_ATTEMPTS {
            // Notify exactly once, on the attempt that crosses the cap.
            // Later failures keep retrying at the capped interval without
            // re-alerting.
            error!("job {} FAILED after {attempts} attempts: {detail}", job.id);
            let filename = serde_json::from_str::<JobPayload>(&job.payload)
                .map(|payload| payload.filename().to_string())
                .unwrap_or_default();
            self.notifier.error(
                "JOB_FAILED",
                NotifyContext {
                    filename,
                    content_hash: job.content_hash.clone().unwrap_or_default(),
                    message: format!("{} failed after {attempts} attempts: {detail}", job.kind),
                },
            );
        } else if attempts > MAX_ATTEMPTS {
            warn!(
                "job {} still failing (attempt {attempts}), retry in {backoff}s",
                job.id
            );
        } else {
            warn!("job {} retry in {backoff}s due to {detail}", job.id);
        }
    }
}
