//! Append-only JSONL audit trail.
//!
//! One record per delivery-relevant event (`enqueued`, `blob_put`,
//! `api_post`). Appends are best-effort: a full disk must degrade the audit
//! trail, never the ingestion path, so failures are logged and swallowed.

use chrono::Utc;
use serde_json::{json, Value};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

const MAX_AUDIT_BYTES: u64 = 10_000_000;

pub struct AuditLog {
    path: PathBuf,
    max_bytes: u64,
    // Serializes appends so interleaved workers cannot tear records.
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            max_bytes: MAX_AUDIT_BYTES,
            write_lock: Mutex::new(()),
        }
    }

    /// Append one event record. `fields` must be a JSON object.
    pub fn append(&self, event: &str, fields: Value) {
        let mut record = json!({
            "ts": Utc::now().timestamp(),
            "event": event,
        });
        if let (Some(map), Some(extra)) = (record.as_object_mut(), fields.as_object()) {
            for (key, value) in extra {
                map.insert(key.clone(), value.clone());
            }
        }

        let _guard = match self.write_lock.lock() {
            Ok(guard) => guard,
            Err(_) => return,
        };
        self.rotate_if_needed();
        if let Err(err) = self.write_line(&record) {
            warn!("audit append failed: {err}");
        }
    }

    fn write_line(&self, record: &Value) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(record.to_string().as_bytes())?;
        file.write_all(b"\n")
    }

    fn rotate_if_needed(&self) {
        let Ok(meta) = std::fs::metadata(&self.path) else {
            return;
        };
        if meta.len() <= self.max_bytes {
            return;
        }
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let rotated = rotated_name(&self.path, &stamp.to_string());
        if let Err(err) = std::fs::rename(&self.path, &rotated) {
            warn!("audit rotation failed: {err}");
        }
    }
}

fn rotated_name(path: &Path, stamp: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audit".to_string());
    let ext = path
        .extension()
        .map(|s| format!(".{}", s.to_string_lossy()))
        .unwrap_or_default();
    path.with_file_name(format!("{stem}-{stamp}{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appends_jsonl_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let audit = AuditLog::new(&path);

        audit.append("enqueued", json!({"filename": "a.pdf", "sha256": "abc"}));
        audit.append("blob_put", json!({"key": "ingests/x"}));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["event"], "enqueued");
        assert_eq!(first["filename"], "a.pdf");
        assert!(first["ts"].is_i64());
    }

    #[test]
    fn rotated_name_keeps_extension() {
        let rotated = rotated_name(Path::new("/tmp/audit.jsonl"), "20250101-000000");
        assert_eq!(
            rotated,
            PathBuf::from("/tmp/audit-20250101-000000.jsonl")
        );
    }
}
