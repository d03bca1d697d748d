//! End-to-end tests for the watch-and-admit pipeline and the worker loop,
//! using in-memory fakes for the extractor and the delivery sinks.

use anyhow::Result;
use async_trait::async_trait;
use paperdrop::jobs::JobPayload;
use paperdrop::worker::MAX_ATTEMPTS;
use paperdrop::{WatchPipeline, Worker};
use paperdrop_db::{JobQueue, SeenIndex};
use paperdrop_extract::{
    content_type_for, sha256_bytes, DocumentExtractor, DocumentPayload, Extracted, Page,
};
use paperdrop_logging::AuditLog;
use paperdrop_sinks::{BlobSink, IngestApi, Notifier, NotifyContext, SinkError};
use sqlx::sqlite::SqlitePool;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::timeout;

/// Extractor that treats the file content as one page of text.
struct TextExtractor;

#[async_trait]
impl DocumentExtractor for TextExtractor {
    async fn extract(&self, path: &Path) -> Result<Extracted> {
        let bytes = tokio::fs::read(path).await?;
        let sha256 = sha256_bytes(&bytes);
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Ok(Extracted {
            payload: DocumentPayload {
                filename: path.file_name().unwrap().to_string_lossy().into_owned(),
                sha256: sha256.clone(),
                pages: vec![Page {
                    page: 1,
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                }],
            },
            bytes,
            content_type: content_type_for(&extension)
                .unwrap_or("application/octet-stream")
                .to_string(),
            sha256,
        })
    }
}

/// Extractor that holds every caller at a barrier before extracting, so
/// concurrent admissions all reach the dedup gate together.
struct GatedTextExtractor {
    barrier: tokio::sync::Barrier,
}

#[async_trait]
impl DocumentExtractor for GatedTextExtractor {
    async fn extract(&self, path: &Path) -> Result<Extracted> {
        self.barrier.wait().await;
        TextExtractor.extract(path).await
    }
}

#[derive(Default)]
struct RecordingBlobSink {
    puts: Mutex<Vec<(String, Vec<u8>, String)>>,
}

#[async_trait]
impl BlobSink for RecordingBlobSink {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        _tags: &BTreeMap<String, String>,
    ) -> Result<(), SinkError> {
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), bytes.to_vec(), content_type.to_string()));
        Ok(())
    }
}

#[derive(Default)]
struct RecordingIngest {
    documents: Mutex<Vec<DocumentPayload>>,
}

#[async_trait]
impl IngestApi for RecordingIngest {
    async fn post_document(&self, document: &DocumentPayload) -> Result<(), SinkError> {
        self.documents.lock().unwrap().push(document.clone());
        Ok(())
    }
}

struct FailingIngest;

#[async_trait]
impl IngestApi for FailingIngest {
    async fn post_document(&self, _document: &DocumentPayload) -> Result<(), SinkError> {
        Err(SinkError::BadStatus {
            status: 503,
            body: "upstream unavailable".to_string(),
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<(String, NotifyContext)>>,
}

impl Notifier for RecordingNotifier {
    fn error(&self, code: &str, ctx: NotifyContext) {
        self.alerts.lock().unwrap().push((code.to_string(), ctx));
    }
}

struct Harness {
    dir: TempDir,
    pool: SqlitePool,
    queue: JobQueue,
    seen: SeenIndex,
    notifier: Arc<RecordingNotifier>,
    watch_dir: PathBuf,
    processed_dir: PathBuf,
    failed_dir: PathBuf,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let watch_dir = dir.path().join("incoming");
        let processed_dir = dir.path().join("processed");
        let failed_dir = dir.path().join("failed");
        std::fs::create_dir_all(&watch_dir).unwrap();

        let pool = paperdrop_db::open_in_memory().await.unwrap();
        Self {
            queue: JobQueue::new(pool.clone()),
            seen: SeenIndex::new(pool.clone()),
            notifier: Arc::new(RecordingNotifier::default()),
            pool,
            watch_dir,
            processed_dir,
            failed_dir,
            dir,
        }
    }

    fn pipeline(&self) -> Arc<WatchPipeline> {
        Arc::new(WatchPipeline {
            queue: self.queue.clone(),
            seen: self.seen.clone(),
            extractor: Arc::new(TextExtractor),
            notifier: Arc::clone(&self.notifier) as Arc<dyn Notifier>,
            audit: Arc::new(AuditLog::new(self.dir.path().join("audit.jsonl"))),
            watch_dir: self.watch_dir.clone(),
            processed_dir: self.processed_dir.clone(),
            failed_dir: self.failed_dir.clone(),
            stability_poll: Duration::from_millis(10),
            stability_max_samples: 20,
        })
    }

    fn worker(&self, api: Arc<dyn IngestApi>, blobs: Arc<dyn BlobSink>) -> Worker {
        Worker {
            queue: self.queue.clone(),
            blobs,
            api,
            notifier: Arc::clone(&self.notifier) as Arc<dyn Notifier>,
            audit: Arc::new(AuditLog::new(self.dir.path().join("audit.jsonl"))),
            blob_prefix: "ingests/".to_string(),
        }
    }

    fn drop_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.watch_dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Make every pending job due right now, as if its backoff had elapsed
    /// or its lease had expired.
    async fn make_all_due(&self) {
        sqlx::query("UPDATE jobs SET not_before = 0")
            .execute(&self.pool)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn admission_enqueues_three_jobs_sharing_the_content_hash() {
    let harness = Harness::new().await;
    let pipeline = harness.pipeline();
    let path = harness.drop_file("invoice.pdf", b"Invoice #42");

    pipeline.admit_file(&path).await;

    assert_eq!(harness.queue.count().await.unwrap(), 3);
    let expected_hash = sha256_bytes(b"Invoice #42");
    assert!(harness.seen.is_seen(&expected_hash).await.unwrap());

    // Jobs come out in the fixed enqueue order.
    let first = harness.queue.claim_next_due().await.unwrap().unwrap();
    let second = harness.queue.claim_next_due().await.unwrap().unwrap();
    let third = harness.queue.claim_next_due().await.unwrap().unwrap();
    assert_eq!(first.kind, "store_original");
    assert_eq!(second.kind, "store_derived");
    assert_eq!(third.kind, "post_document");
    for job in [&first, &second, &third] {
        assert_eq!(job.content_hash.as_deref(), Some(expected_hash.as_str()));
        assert_eq!(job.attempts, 0);
    }

    match serde_json::from_str::<JobPayload>(&first.payload).unwrap() {
        JobPayload::StoreOriginal {
            filename,
            content_type,
            bytes,
            tags,
        } => {
            assert_eq!(filename, "invoice.pdf");
            assert_eq!(content_type, "application/pdf");
            assert_eq!(bytes, b"Invoice #42");
            assert_eq!(tags.get("app").map(String::as_str), Some("paperdrop"));
        }
        other => panic!("unexpected payload kind {}", other.kind()),
    }

    match serde_json::from_str::<JobPayload>(&second.payload).unwrap() {
        JobPayload::StoreDerived {
            filename,
            content_type,
            bytes,
            ..
        } => {
            assert_eq!(filename, format!("{expected_hash}.json"));
            assert_eq!(content_type, "application/json");
            let derived: DocumentPayload = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(derived.pages[0].text, "Invoice #42");
        }
        other => panic!("unexpected payload kind {}", other.kind()),
    }

    match serde_json::from_str::<JobPayload>(&third.payload).unwrap() {
        JobPayload::PostDocument { document } => {
            assert_eq!(document.filename, "invoice.pdf");
            assert_eq!(document.sha256, expected_hash);
            assert_eq!(
                document.pages,
                vec![Page {
                    page: 1,
                    text: "Invoice #42".to_string()
                }]
            );
        }
        other => panic!("unexpected payload kind {}", other.kind()),
    }

    // The file moved to processed and nothing was flagged.
    assert!(!path.exists());
    assert!(harness.processed_dir.join("invoice.pdf").exists());
    assert!(harness.notifier.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn byte_identical_files_are_admitted_once() {
    let harness = Harness::new().await;
    let pipeline = harness.pipeline();

    let first = harness.drop_file("original.pdf", b"same bytes");
    let second = harness.drop_file("renamed-copy.pdf", b"same bytes");

    pipeline.admit_file(&first).await;
    pipeline.admit_file(&second).await;

    // One set of jobs, one seen record, both files routed to processed.
    assert_eq!(harness.queue.count().await.unwrap(), 3);
    assert!(harness.processed_dir.join("original.pdf").exists());
    assert!(harness.processed_dir.join("renamed-copy.pdf").exists());
    assert!(harness.notifier.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_identical_drops_enqueue_one_job_set() {
    let harness = Harness::new().await;
    let mut pipeline = harness.pipeline();
    // Both admissions extract before either reaches the dedup gate, so the
    // is_seen check passes for both and the mark decides the winner.
    Arc::get_mut(&mut pipeline).unwrap().extractor = Arc::new(GatedTextExtractor {
        barrier: tokio::sync::Barrier::new(2),
    });

    let first = harness.drop_file("scan-a.pdf", b"same bytes");
    let second = harness.drop_file("scan-b.pdf", b"same bytes");

    let task_a = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.admit_file(&first).await }
    });
    let task_b = tokio::spawn({
        let pipeline = Arc::clone(&pipeline);
        async move { pipeline.admit_file(&second).await }
    });
    task_a.await.unwrap();
    task_b.await.unwrap();

    // One job set for the shared content, both files routed to processed.
    assert_eq!(harness.queue.count().await.unwrap(), 3);
    assert!(harness.processed_dir.join("scan-a.pdf").exists());
    assert!(harness.processed_dir.join("scan-b.pdf").exists());
    assert!(harness.notifier.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn never_stable_file_is_routed_to_failed() {
    let harness = Harness::new().await;
    let mut pipeline = harness.pipeline();
    // A budget of one sample can never observe two identical samples, which
    // is exactly what a file that never stops changing looks like.
    Arc::get_mut(&mut pipeline).unwrap().stability_max_samples = 1;

    let path = harness.drop_file("slow-upload.pdf", b"partial");
    pipeline.admit_file(&path).await;

    assert!(!path.exists());
    assert!(harness.failed_dir.join("slow-upload.pdf").exists());
    assert_eq!(harness.queue.count().await.unwrap(), 0);

    let alerts = harness.notifier.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].0, "PROCESSING_FAILED");
    assert_eq!(alerts[0].1.filename, "slow-upload.pdf");
}

#[tokio::test]
async fn file_growing_during_the_wait_is_admitted_only_after_it_settles() {
    let harness = Harness::new().await;
    let mut pipeline = harness.pipeline();
    // Sample slowly relative to the writer below, so every sample pair taken
    // while the writer is active sees a size change.
    Arc::get_mut(&mut pipeline).unwrap().stability_poll = Duration::from_millis(40);
    Arc::get_mut(&mut pipeline).unwrap().stability_max_samples = 50;

    let path = harness.drop_file("growing.pdf", b"part one");

    let writer_path = path.clone();
    let writer = tokio::spawn(async move {
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(8)).await;
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&writer_path)
                .unwrap();
            file.write_all(b" and more").unwrap();
        }
    });

    pipeline.admit_file(&path).await;
    writer.await.unwrap();

    // Admission only happened after the writer finished, so the extracted
    // text covers the full final content.
    let third = {
        harness.queue.claim_next_due().await.unwrap();
        harness.queue.claim_next_due().await.unwrap();
        harness.queue.claim_next_due().await.unwrap().unwrap()
    };
    match serde_json::from_str::<JobPayload>(&third.payload).unwrap() {
        JobPayload::PostDocument { document } => {
            let text = &document.pages[0].text;
            assert!(text.starts_with("part one"));
            assert!(text.ends_with(" and more"));
            assert_eq!(text.len(), "part one".len() + 20 * " and more".len());
        }
        other => panic!("unexpected payload kind {}", other.kind()),
    }
}

#[tokio::test]
async fn unsupported_extension_is_left_untouched() {
    let harness = Harness::new().await;
    let pipeline = harness.pipeline();
    let path = harness.drop_file("notes.txt", b"not a document");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(pipeline.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();
    timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // Filtered before admission: no jobs, no seen record, file untouched.
    assert!(path.exists());
    assert_eq!(harness.queue.count().await.unwrap(), 0);
    assert!(harness.notifier.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn worker_delivers_each_job_kind_to_its_sink() {
    let harness = Harness::new().await;
    let pipeline = harness.pipeline();
    let path = harness.drop_file("invoice.pdf", b"Invoice #42");
    pipeline.admit_file(&path).await;

    let blobs = Arc::new(RecordingBlobSink::default());
    let api = Arc::new(RecordingIngest::default());
    let worker = harness.worker(
        Arc::clone(&api) as Arc<dyn IngestApi>,
        Arc::clone(&blobs) as Arc<dyn BlobSink>,
    );

    assert!(worker.run_once().await.unwrap());
    assert!(worker.run_once().await.unwrap());
    assert!(worker.run_once().await.unwrap());
    assert!(!worker.run_once().await.unwrap());
    assert_eq!(harness.queue.count().await.unwrap(), 0);

    let puts = blobs.puts.lock().unwrap();
    assert_eq!(puts.len(), 2);
    assert!(puts[0].0.starts_with("ingests/"));
    assert!(puts[0].0.contains("/original/invoice.pdf"));
    assert_eq!(puts[0].1, b"Invoice #42");
    assert!(puts[1].0.contains("/extracted/"));
    assert!(puts[1].0.ends_with(".json"));

    let documents = api.documents.lock().unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].pages[0].text, "Invoice #42");
}

#[tokio::test]
async fn failed_dispatch_reschedules_with_backoff() {
    let harness = Harness::new().await;
    let pipeline = harness.pipeline();
    let path = harness.drop_file("invoice.pdf", b"Invoice #42");
    pipeline.admit_file(&path).await;

    let worker = harness.worker(
        Arc::new(FailingIngest) as Arc<dyn IngestApi>,
        Arc::new(RecordingBlobSink::default()) as Arc<dyn BlobSink>,
    );

    // Blob jobs succeed against the recording sink, the API post fails.
    for _ in 0..3 {
        assert!(worker.run_once().await.unwrap());
    }
    assert_eq!(harness.queue.count().await.unwrap(), 1);

    // Backed off into the future: nothing is due.
    assert!(!worker.run_once().await.unwrap());

    harness.make_all_due().await;
    assert!(worker.run_once().await.unwrap());

    harness.make_all_due().await;
    let job = harness.queue.claim_next_due().await.unwrap().unwrap();
    assert_eq!(job.kind, "post_document");
    assert_eq!(job.attempts, 2);
}

#[tokio::test]
async fn terminal_failure_notifies_exactly_once_and_keeps_the_job() {
    let harness = Harness::new().await;
    let pipeline = harness.pipeline();
    let path = harness.drop_file("invoice.pdf", b"Invoice #42");
    pipeline.admit_file(&path).await;

    let worker = harness.worker(
        Arc::new(FailingIngest) as Arc<dyn IngestApi>,
        Arc::new(RecordingBlobSink::default()) as Arc<dyn BlobSink>,
    );
    // Drain the two blob jobs first.
    assert!(worker.run_once().await.unwrap());
    assert!(worker.run_once().await.unwrap());

    // Fail past the attempt cap.
    for _ in 0..(MAX_ATTEMPTS + 2) {
        harness.make_all_due().await;
        assert!(worker.run_once().await.unwrap());
    }

    let alerts = harness.notifier.alerts.lock().unwrap();
    let terminal: Vec<_> = alerts.iter().filter(|(code, _)| code == "JOB_FAILED").collect();
    assert_eq!(terminal.len(), 1, "exactly one terminal notification");
    assert_eq!(terminal[0].1.filename, "invoice.pdf");
    assert!(!terminal[0].1.content_hash.is_empty());
    drop(alerts);

    // The job is retained for inspection, still accumulating attempts.
    assert_eq!(harness.queue.count().await.unwrap(), 1);
    harness.make_all_due().await;
    let job = harness.queue.claim_next_due().await.unwrap().unwrap();
    assert_eq!(job.attempts, MAX_ATTEMPTS + 2);
}

#[tokio::test]
async fn worker_loop_surfaces_storage_failure() {
    let harness = Harness::new().await;
    let worker = harness.worker(
        Arc::new(RecordingIngest::default()) as Arc<dyn IngestApi>,
        Arc::new(RecordingBlobSink::default()) as Arc<dyn BlobSink>,
    );

    // A dead store must escape the loop as an error, not strand a silent
    // idle worker.
    harness.pool.close().await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    assert!(worker.run(shutdown_rx).await.is_err());
}

#[tokio::test]
async fn worker_loop_observes_shutdown_promptly() {
    let harness = Harness::new().await;
    let worker = harness.worker(
        Arc::new(RecordingIngest::default()) as Arc<dyn IngestApi>,
        Arc::new(RecordingBlobSink::default()) as Arc<dyn BlobSink>,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    shutdown_tx.send(true).unwrap();

    timeout(Duration::from_millis(600), handle)
        .await
        .expect("worker did not stop within the poll bound")
        .unwrap()
        .unwrap();
}
