//! Native text model and page rasterizer for PDFs.
//!
//! The pipeline talks to PDFs through [`PdfDocument`] so the fallback
//! controller and the page stream can be driven by in-memory fakes.
//! [`LocalPdf`] is the real implementation: `lopdf` for the text layer and
//! `pdftoppm` for rasters.

use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use image::{imageops::FilterType, ImageOutputFormat};
use lopdf::Document;
use tempfile::{NamedTempFile, TempDir};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};

#[async_trait]
pub trait PdfDocument: Send + Sync {
    fn page_count(&self) -> usize;

    /// Text layer of a 1-based page. Empty for image-only pages.
    async fn page_text(&self, page: usize) -> AppResult<String>;

    /// JPEG raster of a 1-based page, bounded to the configured width.
    async fn render_page(&self, page: usize) -> AppResult<Vec<u8>>;
}

pub trait PdfLoader: Send + Sync {
    fn load(&self, filename: &str, bytes: &[u8]) -> AppResult<Arc<dyn PdfDocument>>;
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub pdftoppm_path: String,
    pub dpi: u32,
    pub max_width: u32,
    pub jpeg_quality: u8,
}

impl From<&Config> for RenderSettings {
    fn from(config: &Config) -> Self {
        Self {
            pdftoppm_path: config.pdftoppm_path.clone(),
            dpi: config.render_dpi(),
            max_width: config.render_max_width,
            jpeg_quality: config.jpeg_quality,
        }
    }
}

enum TextLayer {
    Pages(Arc<Document>),
    /// lopdf could not parse the file; pdf-extract text for the whole document.
    Whole(String),
}

pub struct LocalPdf {
    text: TextLayer,
    page_count: usize,
    file: NamedTempFile,
    settings: RenderSettings,
}

impl LocalPdf {
    pub fn load(filename: &str, bytes: &[u8], settings: RenderSettings) -> AppResult<Self> {
        let (text, page_count) = match Document::load_mem(bytes) {
            Ok(doc) => {
                let pages = doc.get_pages().len();
                (TextLayer::Pages(Arc::new(doc)), pages)
            }
            Err(e) => {
                warn!(filename, error = %e, "lopdf failed to parse PDF, trying pdf-extract");
                let text = pdf_extract::extract_text_from_mem(bytes).map_err(|e| {
                    AppError::corrupt(
                        filename,
                        format!("The PDF is corrupted or encrypted ({e}). Try re-exporting it to PDF."),
                    )
                })?;
                (TextLayer::Whole(text), 1)
            }
        };

        if page_count == 0 {
            return Err(AppError::no_text(
                filename,
                "The PDF has no pages. Re-export the document and upload it again.",
            ));
        }

        // pdftoppm reads from disk
        let mut file = NamedTempFile::new()?;
        file.write_all(bytes)?;
        file.flush()?;

        debug!(filename, page_count, "PDF loaded");
        Ok(Self {
            text,
            page_count,
            file,
            settings,
        })
    }

    fn check_page(&self, page: usize) -> AppResult<()> {
        if page == 0 || page > self.page_count {
            return Err(AppError::validation(format!(
                "page {page} out of range 1..={}",
                self.page_count
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl PdfDocument for LocalPdf {
    fn page_count(&self) -> usize {
        self.page_count
    }

    async fn page_text(&self, page: usize) -> AppResult<String> {
        self.check_page(page)?;
        match &self.text {
            TextLayer::Whole(text) => Ok(text.clone()),
            TextLayer::Pages(doc) => {
                let doc = Arc::clone(doc);
                let text = tokio::task::spawn_blocking(move || doc.extract_text(&[page as u32]))
                    .await
                    .map_err(|e| AppError::processing(format!("text extraction task failed: {e}")))?;
                // a page whose fonts lopdf cannot decode counts as image-only
                Ok(text.unwrap_or_else(|e| {
                    debug!(page, error = %e, "no usable text layer on page");
                    String::new()
                }))
            }
        }
    }

    async fn render_page(&self, page: usize) -> AppResult<Vec<u8>> {
        self.check_page(page)?;
        let out_dir = TempDir::new()?;
        let prefix: PathBuf = out_dir.path().join("page");

        let output = Command::new(&self.settings.pdftoppm_path)
            .arg("-jpeg")
            .arg("-singlefile")
            .args(["-r", &self.settings.dpi.to_string()])
            .args(["-f", &page.to_string(), "-l", &page.to_string()])
            .arg(self.file.path())
            .arg(&prefix)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::ocr(format!("failed to run pdftoppm: {e}")))?;

        if !output.status.success() {
            return Err(AppError::ocr(format!(
                "pdftoppm failed on page {page}: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let jpeg = tokio::fs::read(prefix.with_extension("jpg")).await?;
        let settings = self.settings.clone();
        tokio::task::spawn_blocking(move || bound_width(jpeg, &settings))
            .await
            .map_err(|e| AppError::processing(format!("raster resize task failed: {e}")))?
    }
}

/// Downscales a raster wider than `max_width`, keeping the aspect ratio.
pub fn bound_width(jpeg: Vec<u8>, settings: &RenderSettings) -> AppResult<Vec<u8>> {
    let img = image::load_from_memory(&jpeg)
        .map_err(|e| AppError::ocr(format!("rendered page is not a readable image: {e}")))?;
    if img.width() <= settings.max_width {
        return Ok(jpeg);
    }

    let height = (img.height() as u64 * settings.max_width as u64 / img.width() as u64).max(1) as u32;
    let resized = img.resize(settings.max_width, height, FilterType::Triangle);

    let mut out = Cursor::new(Vec::new());
    resized
        .write_to(&mut out, ImageOutputFormat::Jpeg(settings.jpeg_quality))
        .map_err(|e| AppError::ocr(format!("failed to encode page raster: {e}")))?;
    Ok(out.into_inner())
}

pub struct LocalPdfLoader {
    settings: RenderSettings,
}

impl LocalPdfLoader {
    pub fn new(config: &Config) -> Self {
        Self {
            settings: RenderSettings::from(config),
        }
    }
}

impl PdfLoader for LocalPdfLoader {
    fn load(&self, filename: &str, bytes: &[u8]) -> AppResult<Arc<dyn PdfDocument>> {
        Ok(Arc::new(LocalPdf::load(filename, bytes, self.settings.clone())?))
    }
}

pub async fn is_pdftoppm_available(path: &str) -> bool {
    Command::new(path)
        .arg("-v")
        .output()
        .await
        .map(|output| output.status.success())
        .unwrap_or(false)
}
