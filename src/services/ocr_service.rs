use std::io::Write;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tempfile::Builder;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};

/// A recognition engine. One instance serves one pool worker.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image: &[u8]) -> AppResult<String>;
}

/// Builds engines for the pool. Called once per worker at pool init.
#[async_trait]
pub trait OcrEngineFactory: Send + Sync {
    async fn create(&self, worker_id: usize) -> AppResult<Arc<dyn OcrEngine>>;
}

/// Runs the `tesseract` binary on a raster written to a temp file.
pub struct TesseractEngine {
    binary: String,
    language: String,
    worker_id: usize,
}

impl TesseractEngine {
    pub async fn new(binary: &str, language: &str, worker_id: usize) -> AppResult<Self> {
        if !is_tesseract_available(binary).await {
            return Err(AppError::pool_init(format!(
                "Tesseract OCR not available on this system (tried `{binary}`)"
            )));
        }
        debug!(worker_id, binary, language, "tesseract engine ready");
        Ok(Self {
            binary: binary.to_string(),
            language: language.to_string(),
            worker_id,
        })
    }
}

#[async_trait]
impl OcrEngine for TesseractEngine {
    async fn recognize(&self, image: &[u8]) -> AppResult<String> {
        let start = Instant::now();

        let mut input = Builder::new().suffix(".jpg").tempfile()?;
        input.write_all(image)?;
        input.flush()?;

        // kill_on_drop lets a caller abandon a slow page mid-recognition
        let output = Command::new(&self.binary)
            .arg(input.path())
            .arg("stdout")
            .args(["-l", &self.language])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::ocr(format!("failed to run tesseract: {e}")))?;

        if !output.status.success() {
            return Err(AppError::ocr(format!(
                "tesseract exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(
            worker_id = self.worker_id,
            chars = text.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "page recognized"
        );
        Ok(text)
    }
}

pub struct TesseractFactory {
    binary: String,
    language: String,
}

impl TesseractFactory {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: config.tesseract_path.clone(),
            language: config.ocr_language.clone(),
        }
    }
}

#[async_trait]
impl OcrEngineFactory for TesseractFactory {
    async fn create(&self, worker_id: usize) -> AppResult<Arc<dyn OcrEngine>> {
        let engine = TesseractEngine::new(&self.binary, &self.language, worker_id).await?;
        info!(worker_id, "OCR worker engine initialized");
        Ok(Arc::new(engine))
    }
}

pub async fn is_tesseract_available(binary: &str) -> bool {
    match Command::new(binary).arg("--version").output().await {
        Ok(output) => output.status.success(),
        Err(e) => {
            warn!(binary, error = %e, "tesseract probe failed");
            false
        }
    }
}
