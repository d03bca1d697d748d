//! Extractor implementation backed by external tools.
//!
//! PDFs get their native text layer via `pdftotext`; a page that comes back
//! empty is rasterized with `pdftoppm` and run through `tesseract`. Raster
//! images go straight to `tesseract`. Tool paths are configurable so packaged
//! installs can pin their own binaries.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::debug;

use crate::{content_type_for, sha256_bytes, DocumentExtractor, DocumentPayload, Extracted, Page};

const RASTER_DPI: &str = "300";

/// External tool locations. Bare command names resolve through PATH.
#[derive(Debug, Clone)]
pub struct ExtractorTools {
    pub pdfinfo: String,
    pub pdftotext: String,
    pub pdftoppm: String,
    pub tesseract: String,
    pub ocr_lang: String,
}

impl Default for ExtractorTools {
    fn default() -> Self {
        Self {
            pdfinfo: "pdfinfo".to_string(),
            pdftotext: "pdftotext".to_string(),
            pdftoppm: "pdftoppm".to_string(),
            tesseract: "tesseract".to_string(),
            ocr_lang: "eng".to_string(),
        }
    }
}

pub struct SubprocessExtractor {
    tools: ExtractorTools,
}

impl SubprocessExtractor {
    pub fn new(tools: ExtractorTools) -> Self {
        Self { tools }
    }

    async fn pdf_pages(&self, path: &Path) -> Result<Vec<Page>> {
        let page_count = self.pdf_page_count(path).await?;
        let mut pages = Vec::with_capacity(page_count as usize);
        for number in 1..=page_count {
            let page_arg = number.to_string();
            let text = run_capture(
                &self.tools.pdftotext,
                &[
                    "-f",
                    &page_arg,
                    "-l",
                    &page_arg,
                    "-layout",
                    &path.to_string_lossy(),
                    "-",
                ],
            )
            .await
            .context("pdftotext failed")?;
            let text = text.trim().to_string();

            let text = if text.is_empty() {
                debug!("page {number} has no text layer, falling back to OCR");
                self.ocr_pdf_page(path, number).await?
            } else {
                text
            };
            pages.push(Page { page: number, text });
        }
        Ok(pages)
    }

    async fn pdf_page_count(&self, path: &Path) -> Result<u32> {
        let info = run_capture(&self.tools.pdfinfo, &[&path.to_string_lossy()])
            .await
            .context("pdfinfo failed")?;
        for line in info.lines() {
            if let Some(rest) = line.strip_prefix("Pages:") {
                return rest
                    .trim()
                    .parse::<u32>()
                    .context("pdfinfo reported an unparseable page count");
            }
        }
        bail!("pdfinfo output did not include a page count");
    }

    async fn ocr_pdf_page(&self, path: &Path, number: u32) -> Result<String> {
        let raster_dir = tempfile::tempdir().context("Failed to create raster dir")?;
        let prefix = raster_dir.path().join("page");
        let page_arg = number.to_string();
        run_capture(
            &self.tools.pdftoppm,
            &[
                "-f",
                &page_arg,
                "-l",
                &page_arg,
                "-r",
                RASTER_DPI,
                "-png",
                &path.to_string_lossy(),
                &prefix.to_string_lossy(),
            ],
        )
        .await
        .context("pdftoppm failed")?;

        // pdftoppm zero-pads the page suffix based on the total page count,
        // so locate whatever single png it produced.
        let raster = std::fs::read_dir(raster_dir.path())
            .context("Failed to list raster dir")?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .find(|p| p.extension().is_some_and(|ext| ext == "png"))
            .context("pdftoppm produced no raster output")?;

        self.ocr_file(&raster).await
    }

    async fn ocr_file(&self, path: &Path) -> Result<String> {
        let text = run_capture(
            &self.tools.tesseract,
            &[
                &path.to_string_lossy(),
                "stdout",
                "-l",
                &self.tools.ocr_lang,
            ],
        )
        .await
        .context("tesseract failed")?;
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl DocumentExtractor for SubprocessExtractor {
    async fn extract(&self, path: &Path) -> Result<Extracted> {
        let extension = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let Some(content_type) = content_type_for(&extension) else {
            bail!("Unsupported file type: .{extension}");
        };

        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let sha256 = sha256_bytes(&bytes);

        let pages = if extension == "pdf" {
            self.pdf_pages(path).await?
        } else {
            let text = self.ocr_file(path).await?;
            vec![Page { page: 1, text }]
        };

        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Extracted {
            payload: DocumentPayload {
                filename,
                sha256: sha256.clone(),
                pages,
            },
            bytes,
            content_type: content_type.to_string(),
            sha256,
        })
    }
}

async fn run_capture(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to run {program}"))?;
    if !output.status.success() {
        bail!(
            "{program} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
