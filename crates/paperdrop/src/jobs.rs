//! Delivery job payloads and admission-side enqueueing.
//!
//! One admitted document yields three jobs, enqueued atomically and in a
//! fixed order: store the original blob, store the derived JSON blob, post
//! to the ingestion API. The three deliveries are independent and may
//! complete out of order.

use anyhow::Result;
use chrono::{DateTime, Datelike, Utc};
use paperdrop_db::{JobQueue, NewJob};
use paperdrop_extract::{DocumentPayload, Extracted};
use paperdrop_logging::AuditLog;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;

/// Kind-specific job payload. The tag doubles as the queue's `kind` column.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    StoreOriginal {
        filename: String,
        content_type: String,
        #[serde(with = "b64")]
        bytes: Vec<u8>,
        tags: BTreeMap<String, String>,
    },
    StoreDerived {
        filename: String,
        content_type: String,
        #[serde(with = "b64")]
        bytes: Vec<u8>,
        tags: BTreeMap<String, String>,
    },
    PostDocument {
        document: DocumentPayload,
    },
}

impl JobPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::StoreOriginal { .. } => "store_original",
            JobPayload::StoreDerived { .. } => "store_derived",
            JobPayload::PostDocument { .. } => "post_document",
        }
    }

    /// Source filename, for sanitized notifications.
    pub fn filename(&self) -> &str {
        match self {
            JobPayload::StoreOriginal { filename, .. }
            | JobPayload::StoreDerived { filename, .. } => filename,
            JobPayload::PostDocument { document } => &document.filename,
        }
    }

    fn into_new_job(self, content_hash: &str) -> Result<NewJob> {
        Ok(NewJob {
            kind: self.kind().to_string(),
            payload: serde_json::to_string(&self)?,
            content_hash: Some(content_hash.to_string()),
        })
    }
}

/// Deterministic blob key: `<prefix>YYYY/MM/DD/<kind>/<filename>`.
pub fn blob_key(prefix: &str, kind: &str, filename: &str, date: DateTime<Utc>) -> String {
    format!(
        "{prefix}{:04}/{:02}/{:02}/{kind}/{filename}",
        date.year(),
        date.month(),
        date.day()
    )
}

fn default_tags() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("retention".to_string(), "2y".to_string()),
        ("app".to_string(), "paperdrop".to_string()),
    ])
}

/// Enqueue the three delivery jobs for one admitted document, tagged with
/// its content hash, in a single transaction.
pub async fn enqueue_ingest_jobs(
    queue: &JobQueue,
    audit: &AuditLog,
    extracted: &Extracted,
) -> Result<Vec<i64>> {
    let json_bytes = serde_json::to_vec(&extracted.payload)?;
    let filename = extracted.payload.filename.clone();

    let jobs = [
        JobPayload::StoreOriginal {
            filename: filename.clone(),
            content_type: extracted.content_type.clone(),
            bytes: extracted.bytes.clone(),
            tags: default_tags(),
        },
        JobPayload::StoreDerived {
            filename: format!("{}.json", extracted.sha256),
            content_type: "application/json".to_string(),
            bytes: json_bytes,
            tags: default_tags(),
        },
        JobPayload::PostDocument {
            document: extracted.payload.clone(),
        },
    ]
    .into_iter()
    .map(|payload| payload.into_new_job(&extracted.sha256))
    .collect::<Result<Vec<_>>>()?;

    let ids = queue.enqueue_all(&jobs).await?;
    audit.append(
        "enqueued",
        json!({"filename": filename, "sha256": extracted.sha256, "jobs": ids}),
    );
    Ok(ids)
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
