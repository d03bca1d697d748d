//! Document extraction for the Paperdrop ingestor.
//!
//! The pipeline only depends on the [`DocumentExtractor`] trait; the bundled
//! implementation shells out to poppler/tesseract (see [`subprocess`]),
//! mirroring the usual "native text first, OCR fallback" flow.

pub mod fingerprint;
pub mod schema;
pub mod subprocess;

pub use fingerprint::{sha256_bytes, sha256_file};
pub use schema::{DocumentPayload, Page};
pub use subprocess::SubprocessExtractor;

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// Everything admission needs from one raw file.
#[derive(Debug, Clone)]
pub struct Extracted {
    pub payload: DocumentPayload,
    /// The original file bytes, delivered unmodified to the blob sink.
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub sha256: String,
}

#[async_trait]
pub trait DocumentExtractor: Send + Sync {
    /// Turn a raw file into (text-per-page, content-type, content-hash).
    async fn extract(&self, path: &Path) -> Result<Extracted>;
}

/// Content type for a supported extension (lowercase, without dot).
pub fn content_type_for(extension: &str) -> Option<&'static str> {
    match extension {
        "pdf" => Some("application/pdf"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}
