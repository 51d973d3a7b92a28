use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// Service and pipeline settings.
///
/// Loaded from built-in defaults, then an optional `docsift.toml`, then
/// environment variables with the upper-cased field name (`OCR_POOL_SIZE`).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub max_file_size_mb: usize,
    pub min_file_size_bytes: usize,
    pub max_concurrent_requests: usize,
    pub request_timeout_seconds: u64,

    /// Number of OCR engines kept warm for the life of the process.
    pub ocr_pool_size: usize,
    /// A PDF whose text layer has at least this many words skips OCR.
    pub native_word_threshold: usize,
    /// Upper bound on pages OCR'd per scanned PDF.
    pub max_ocr_pages: usize,
    pub ocr_batch_size: usize,
    /// Wall-clock budget for OCR of one scanned PDF.
    pub ocr_budget_ms: u64,
    pub ocr_call_timeout_ms: u64,
    pub ocr_language: String,

    pub stream_batch_size: usize,
    /// Pages with fewer native characters than this are OCR'd when streaming.
    pub stream_min_native_chars: usize,
    pub stream_pause_every_pages: usize,
    pub stream_pause_ms: u64,

    pub render_scale: f32,
    pub render_max_width: u32,
    pub jpeg_quality: u8,

    pub tesseract_path: String,
    pub pdftoppm_path: String,
    /// `pretty` or `json`.
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_host: "0.0.0.0".to_string(),
            server_port: 8080,
            max_file_size_mb: 100,
            min_file_size_bytes: 100,
            max_concurrent_requests: 16,
            request_timeout_seconds: 120,
            ocr_pool_size: 3,
            native_word_threshold: 50,
            max_ocr_pages: 8,
            ocr_batch_size: 4,
            ocr_budget_ms: 7_000,
            ocr_call_timeout_ms: 4_000,
            ocr_language: "eng".to_string(),
            stream_batch_size: 3,
            stream_min_native_chars: 20,
            stream_pause_every_pages: 20,
            stream_pause_ms: 25,
            render_scale: 1.5,
            render_max_width: 2500,
            jpeg_quality: 85,
            tesseract_path: "tesseract".to_string(),
            pdftoppm_path: "pdftoppm".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration");

        let settings = config::Config::builder()
            .add_source(config::File::with_name("docsift").required(false))
            .add_source(config::Environment::default().try_parsing(true))
            .build()
            .context("Failed to assemble configuration sources")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        info!("Configuration loaded successfully: {:?}", config);
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.server_port == 0 {
            return Err(anyhow::anyhow!("SERVER_PORT must be greater than 0"));
        }
        if self.max_file_size_mb == 0 {
            return Err(anyhow::anyhow!("MAX_FILE_SIZE_MB must be greater than 0"));
        }
        if self.max_concurrent_requests == 0 {
            return Err(anyhow::anyhow!("MAX_CONCURRENT_REQUESTS must be greater than 0"));
        }
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("REQUEST_TIMEOUT_SECONDS must be greater than 0"));
        }
        if self.ocr_pool_size == 0 {
            return Err(anyhow::anyhow!("OCR_POOL_SIZE must be greater than 0"));
        }
        // first three and last two pages are always sampled
        if self.max_ocr_pages < 5 {
            return Err(anyhow::anyhow!("MAX_OCR_PAGES must be at least 5"));
        }
        if self.ocr_batch_size == 0 || self.stream_batch_size == 0 {
            return Err(anyhow::anyhow!("OCR_BATCH_SIZE and STREAM_BATCH_SIZE must be greater than 0"));
        }
        if self.ocr_budget_ms == 0 || self.ocr_call_timeout_ms == 0 {
            return Err(anyhow::anyhow!("OCR_BUDGET_MS and OCR_CALL_TIMEOUT_MS must be greater than 0"));
        }
        if !(self.render_scale > 0.0) || self.render_max_width == 0 {
            return Err(anyhow::anyhow!("RENDER_SCALE and RENDER_MAX_WIDTH must be positive"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow::anyhow!("JPEG_QUALITY must be between 1 and 100"));
        }
        Ok(())
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn ocr_budget(&self) -> Duration {
        Duration::from_millis(self.ocr_budget_ms)
    }

    pub fn ocr_call_timeout(&self) -> Duration {
        Duration::from_millis(self.ocr_call_timeout_ms)
    }

    pub fn stream_pause(&self) -> Duration {
        Duration::from_millis(self.stream_pause_ms)
    }

    /// Render resolution for OCR rasters, relative to the 72 DPI PDF user space.
    pub fn render_dpi(&self) -> u32 {
        (72.0 * self.render_scale).round() as u32
    }
}
