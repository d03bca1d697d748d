//! Configuration for the Paperdrop ingestor.

use anyhow::{Context, Result};
use paperdrop_extract::subprocess::ExtractorTools;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source of new files; entries are moved out once admitted or rejected.
    #[serde(default = "default_watch_dir")]
    pub watch_dir: PathBuf,
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,
    #[serde(default = "default_failed_dir")]
    pub failed_dir: PathBuf,

    /// SQLite file holding the job queue and seen-file index.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Root directory of the filesystem blob sink.
    #[serde(default = "default_blob_root")]
    pub blob_root: PathBuf,
    #[serde(default = "default_blob_prefix")]
    pub blob_prefix: String,
    /// Retention recorded in blob metadata, in days.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Ingestion API endpoint; a base URL is normalized to `/ingest`.
    #[serde(default = "default_ingest_endpoint")]
    pub ingest_endpoint: String,
    #[serde(default)]
    pub ingest_token: Option<String>,

    /// Webhook for sanitized alerts. Unset disables notifications.
    #[serde(default)]
    pub slack_webhook_url: Option<String>,

    // Extraction tool locations; bare names resolve through PATH.
    #[serde(default = "default_pdfinfo_cmd")]
    pub pdfinfo_cmd: String,
    #[serde(default = "default_pdftotext_cmd")]
    pub pdftotext_cmd: String,
    #[serde(default = "default_pdftoppm_cmd")]
    pub pdftoppm_cmd: String,
    #[serde(default = "default_tesseract_cmd")]
    pub tesseract_cmd: String,
    #[serde(default = "default_ocr_lang")]
    pub ocr_lang: String,

    #[serde(default = "default_stability_poll_ms")]
    pub stability_poll_ms: u64,
    #[serde(default = "default_stability_max_samples")]
    pub stability_max_samples: u32,

    #[serde(default = "default_audit_log")]
    pub audit_log: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Tracing filter directives, e.g. "paperdrop=debug". Unset uses the
    /// built-in default; `RUST_LOG` overrides both.
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_watch_dir() -> PathBuf {
    PathBuf::from("./incoming")
}
fn default_processed_dir() -> PathBuf {
    PathBuf::from("./processed")
}
fn default_failed_dir() -> PathBuf {
    PathBuf::from("./failed")
}
fn default_db_path() -> PathBuf {
    PathBuf::from("./queue.db")
}
fn default_blob_root() -> PathBuf {
    PathBuf::from("./blobs")
}
fn default_blob_prefix() -> String {
    "ingests/".to_string()
}
fn default_retention_days() -> i64 {
    730
}
fn default_ingest_endpoint() -> String {
    "http://localhost:9876/ingest".to_string()
}
fn default_pdfinfo_cmd() -> String {
    "pdfinfo".to_string()
}
fn default_pdftotext_cmd() -> String {
    "pdftotext".to_string()
}
fn default_pdftoppm_cmd() -> String {
    "pdftoppm".to_string()
}
fn default_tesseract_cmd() -> String {
    "tesseract".to_string()
}
fn default_ocr_lang() -> String {
    "eng".to_string()
}
fn default_stability_poll_ms() -> u64 {
    500
}
fn default_stability_max_samples() -> u32 {
    60
}
fn default_audit_log() -> PathBuf {
    PathBuf::from("./audit.jsonl")
}
fn default_log_dir() -> PathBuf {
    PathBuf::from("./logs")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            watch_dir: default_watch_dir(),
            processed_dir: default_processed_dir(),
            failed_dir: default_failed_dir(),
            db_path: default_db_path(),
            blob_root: default_blob_root(),
            blob_prefix: default_blob_prefix(),
            retention_days: default_retention_days(),
            ingest_endpoint: default_ingest_endpoint(),
            ingest_token: None,
            slack_webhook_url: None,
            pdfinfo_cmd: default_pdfinfo_cmd(),
            pdftotext_cmd: default_pdftotext_cmd(),
            pdftoppm_cmd: default_pdftoppm_cmd(),
            tesseract_cmd: default_tesseract_cmd(),
            ocr_lang: default_ocr_lang(),
            stability_poll_ms: default_stability_poll_ms(),
            stability_max_samples: default_stability_max_samples(),
            audit_log: default_audit_log(),
            log_dir: default_log_dir(),
            log_filter: None,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config {}", path.display()))?;
        Ok(())
    }

    /// Create every directory the pipeline writes into.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.watch_dir,
            &self.processed_dir,
            &self.failed_dir,
            &self.blob_root,
            &self.log_dir,
        ] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        if let Some(parent) = self.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        Ok(())
    }

    pub fn extractor_tools(&self) -> ExtractorTools {
        ExtractorTools {
            pdfinfo: self.pdfinfo_cmd.clone(),
            pdftotext: self.pdftotext_cmd.clone(),
            pdftoppm: self.pdftoppm_cmd.clone(),
            tesseract: self.tesseract_cmd.clone(),
            ocr_lang: self.ocr_lang.clone(),
        }
    }
}
