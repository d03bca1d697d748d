//! Watch-and-admit pipeline.
//!
//! Bridges filesystem creation events into job creation, exactly once per
//! distinct document content. Each file is processed in isolation: one bad
//! file is routed to the failed directory and never blocks the next.

use anyhow::{bail, Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use paperdrop_db::{JobQueue, SeenIndex};
use paperdrop_extract::DocumentExtractor;
use paperdrop_logging::AuditLog;
use paperdrop_sinks::{Notifier, NotifyContext};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

use crate::jobs::enqueue_ingest_jobs;

/// Document and raster formats the watcher admits. Anything else is
/// ignored before the stability wait.
const ALLOWED_EXTENSIONS: &[&str] = &["pdf", "jpg", "jpeg", "png"];

pub struct WatchPipeline {
    pub queue: JobQueue,
    pub seen: SeenIndex,
    pub extractor: Arc<dyn DocumentExtractor>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<AuditLog>,
    pub watch_dir: PathBuf,
    pub processed_dir: PathBuf,
    pub failed_dir: PathBuf,
    /// Interval between size/mtime samples in the stability wait.
    pub stability_poll: Duration,
    /// Sample budget before a still-changing file times out.
    pub stability_max_samples: u32,
}

impl WatchPipeline {
    /// Watch the drop folder until the shutdown flag flips. Files already
    /// present at startup are swept into the same admission path, so drops
    /// made while the process was down are not missed.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<PathBuf>();

        for entry in std::fs::read_dir(&self.watch_dir)
            .with_context(|| format!("Failed to read watch dir {}", self.watch_dir.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                let _ = tx.send(entry.path());
            }
        }

        let event_tx = tx.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<notify::Event>| {
                if let Ok(event) = result {
                    if matches!(event.kind, EventKind::Create(_)) {
                        for path in event.paths {
                            let _ = event_tx.send(path);
                        }
                    }
                }
            },
            notify::Config::default(),
        )
        .context("Failed to start filesystem watcher")?;
        watcher
            .watch(&self.watch_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("Failed to watch {}", self.watch_dir.display()))?;
        info!("watcher started on {}", self.watch_dir.display());

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => break,
                candidate = rx.recv() => {
                    let Some(path) = candidate else { break };
                    if !is_supported(&path) {
                        continue;
                    }
                    // Concurrent drops are admitted concurrently; the store
                    // is the only shared state between these tasks.
                    let pipeline = Arc::clone(&self);
                    tokio::spawn(async move { pipeline.admit_file(&path).await });
                }
            }
        }

        info!("watcher stopped");
        Ok(())
    }

    /// Admit one candidate file. Never returns an error: failures are
    /// notified (sanitized) and the file is routed to the failed directory.
    pub async fn admit_file(&self, path: &Path) {
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("new file detected: {filename}");

        if let Err(err) = self.try_admit(path, &filename).await {
            warn!("processing failed for {filename}: {err:#}");
            self.notifier.error(
                "PROCESSING_FAILED",
                NotifyContext {
                    filename: filename.clone(),
                    content_hash: String::new(),
                    message: format!("{err:#}"),
                },
            );
            // Best effort: a failed move is logged, not escalated.
            if let Err(move_err) = move_file(path, &self.failed_dir) {
                warn!("could not move {filename} to failed dir: {move_err:#}");
            }
        }
    }

    async fn try_admit(&self, path: &Path, filename: &str) -> Result<()> {
        self.wait_for_stable(path).await?;

        let extracted = self
            .extractor
            .extract(path)
            .await
            .context("extraction failed")?;

        if self.seen.is_seen(&extracted.sha256).await? {
            info!("duplicate skipped: {filename} sha256={}", extracted.sha256);
            // Move to processed anyway so the drop does not re-trigger.
            move_file(path, &self.processed_dir)?;
            return Ok(());
        }

        // Admissions run concurrently, so the insert is the gate: identical
        // bytes admitted at the same time both pass the check above, but only
        // one wins the mark and enqueues.
        if !self.seen.mark_seen(&extracted.sha256, filename).await? {
            info!(
                "duplicate skipped (concurrent admission): {filename} sha256={}",
                extracted.sha256
            );
            move_file(path, &self.processed_dir)?;
            return Ok(());
        }

        if let Err(err) = enqueue_ingest_jobs(&self.queue, &self.audit, &extracted).await {
            // The hash is now recorded with no jobs, so a re-drop would be
            // skipped as a duplicate. Flag the state for the operator: the
            // seen record must be cleared before this document can re-enter.
            error!(
                "admission of {filename} recorded without jobs, sha256={} needs manual clearing",
                extracted.sha256
            );
            return Err(err);
        }

        let dest = move_file(path, &self.processed_dir)?;
        info!("moved to processed: {}", dest.display());
        Ok(())
    }

    /// Poll size+mtime until two consecutive samples match. A file still
    /// being written keeps changing and is not admitted; one that never
    /// settles within the budget times out into failure handling.
    async fn wait_for_stable(&self, path: &Path) -> Result<()> {
        let mut previous: Option<(u64, SystemTime)> = None;
        for _ in 0..self.stability_max_samples {
            let meta = tokio::fs::metadata(path)
                .await
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            let sample = (meta.len(), meta.modified()?);
            if previous == Some(sample) {
                return Ok(());
            }
            previous = Some(sample);
            tokio::time::sleep(self.stability_poll).await;
        }
        bail!(
            "file not stable after {} samples",
            self.stability_max_samples
        )
    }
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| ALLOWED_EXTENSIONS.contains(&ext.as_str()))
}

/// Rename into `dest_dir`, falling back to copy+remove across filesystems.
fn move_file(src: &Path, dest_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
    let file_name = src
        .file_name()
        .with_context(|| format!("{} has no file name", src.display()))?;
    let dest = dest_dir.join(file_name);
    if std::fs::rename(src, &dest).is_err() {
        std::fs::copy(src, &dest)
            .with_context(|| format!("Failed to copy {} to {}", src.display(), dest.display()))?;
        std::fs::remove_file(src)
            .with_context(|| format!("Failed to remove {}", src.display()))?;
    }
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_filter_is_case_insensitive() {
        assert!(is_supported(Path::new("/drop/scan.PDF")));
        assert!(is_supported(Path::new("/drop/photo.jpeg")));
        assert!(!is_supported(Path::new("/drop/notes.txt")));
        assert!(!is_supported(Path::new("/drop/no_extension")));
    }

    #[test]
    fn move_file_lands_in_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.pdf");
        std::fs::write(&src, b"x").unwrap();

        let dest_dir = dir.path().join("processed");
        let dest = move_file(&src, &dest_dir).unwrap();

        assert!(!src.exists());
        assert_eq!(dest, dest_dir.join("a.pdf"));
        assert_eq!(std::fs::read(dest).unwrap(), b"x");
    }
}
