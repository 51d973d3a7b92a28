use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::{
    BatchExtraction, DocumentFormat, ExtractedContent, FileDescriptor, OcrSummary,
};
use crate::services::format_detector::{conversion_instructions, detect_format, validate_file};
use crate::services::ocr_pool::OcrWorkerPool;
use crate::services::office::{extract_docx, extract_pptx, extract_txt};
use crate::services::page_stream::PageStreamProcessor;
use crate::services::pdf_document::{PdfDocument, PdfLoader};
use crate::services::pdf_processor::PdfProcessor;
use crate::services::ppt_parser::extract_ppt;

/// `(overall_percent, message)`; the percentage never decreases within a batch.
pub type ProgressCallback = Arc<dyn Fn(f32, &str) + Send + Sync>;

struct FileText {
    text: String,
    page_count: Option<usize>,
    ocr: Option<OcrSummary>,
}

impl FileText {
    fn plain(text: String) -> Self {
        Self {
            text,
            page_count: None,
            ocr: None,
        }
    }
}

/// Entry point of the pipeline: one file or an ordered batch in, text out.
pub struct Extractor {
    config: Config,
    pool: Arc<OcrWorkerPool>,
    pdf_loader: Arc<dyn PdfLoader>,
    pdf: PdfProcessor,
    pages: PageStreamProcessor,
}

impl Extractor {
    pub fn new(config: Config, pool: Arc<OcrWorkerPool>, pdf_loader: Arc<dyn PdfLoader>) -> Self {
        Self {
            pdf: PdfProcessor::new(Arc::clone(&pool), config.clone()),
            pages: PageStreamProcessor::new(Arc::clone(&pool), config.clone()),
            config,
            pool,
            pdf_loader,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Arc<OcrWorkerPool> {
        &self.pool
    }

    pub fn page_stream(&self) -> &PageStreamProcessor {
        &self.pages
    }

    /// Parses a PDF upload on the blocking pool.
    pub async fn load_pdf(&self, file: &FileDescriptor) -> AppResult<Arc<dyn PdfDocument>> {
        let loader = Arc::clone(&self.pdf_loader);
        parse_off_runtime(file, move |name, bytes| loader.load(name, bytes)).await
    }

    /// Extracts every file in submission order. A failing file is recorded
    /// on its own entry and does not stop the rest.
    pub async fn extract_batch(
        &self,
        files: Vec<FileDescriptor>,
        progress: Option<ProgressCallback>,
    ) -> BatchExtraction {
        let total = files.len().max(1) as f32;
        let mut details = Vec::with_capacity(files.len());

        for (index, file) in files.into_iter().enumerate() {
            let completed = index as f32;
            let file_progress = |pct: f32, message: &str| {
                if let Some(cb) = &progress {
                    let pct = pct.clamp(0.0, 100.0);
                    cb((completed / total) * 100.0 + pct / total, message);
                }
            };

            let content = self.extract_file(&file, &file_progress).await;
            file_progress(100.0, &format!("Finished {}", file.name));
            details.push(content);
        }

        let batch = BatchExtraction::from_files(details);
        info!(
            files = batch.file_details.len(),
            failed = batch.failed_count(),
            total_word_count = batch.total_word_count,
            "batch extraction finished"
        );
        batch
    }

    /// Extracts one file; failures are folded into the returned content.
    #[tracing::instrument(skip(self, file, progress), fields(file_name = %file.name, file_size = file.byte_size))]
    pub async fn extract_file(
        &self,
        file: &FileDescriptor,
        progress: &(dyn Fn(f32, &str) + Send + Sync),
    ) -> ExtractedContent {
        let start = Instant::now();
        let format = detect_format(file.header(), &file.name).detected_format;

        match self.extract_text(file, format, progress).await {
            Ok(out) => {
                let content = ExtractedContent::new(&file.name, format, out.text)
                    .with_page_count(out.page_count)
                    .with_ocr(out.ocr)
                    .with_processing_time(start.elapsed().as_millis() as u64);
                info!(
                    word_count = content.word_count,
                    has_math_content = content.has_math_content,
                    processing_time_ms = content.processing_time_ms,
                    "file extracted"
                );
                content
            }
            Err(e) => {
                if e.is_per_file() {
                    warn!(error = %e, "file extraction failed");
                } else {
                    error!(error = %e, "file extraction failed");
                }
                ExtractedContent::failed(&file.name, format, &e)
                    .with_processing_time(start.elapsed().as_millis() as u64)
            }
        }
    }

    async fn extract_text(
        &self,
        file: &FileDescriptor,
        format: DocumentFormat,
        progress: &(dyn Fn(f32, &str) + Send + Sync),
    ) -> AppResult<FileText> {
        let outcome = validate_file(file, &self.config);
        if !outcome.success {
            return Err(gate_error(file, &self.config, format));
        }

        let name = file.name.as_str();
        let bytes = file.raw_bytes.as_ref();
        progress(5.0, &format!("Reading {name}"));

        let out = match format {
            DocumentFormat::Txt => FileText::plain(extract_txt(bytes)),
            DocumentFormat::Docx => FileText::plain(parse_off_runtime(file, extract_docx).await?),
            DocumentFormat::Pptx => FileText::plain(parse_off_runtime(file, extract_pptx).await?),
            DocumentFormat::Ppt => FileText::plain(parse_off_runtime(file, extract_ppt).await?),
            DocumentFormat::Pdf => {
                let doc = self.load_pdf(file).await?;
                let pdf = self.pdf.extract(name, doc, progress).await?;
                FileText {
                    text: pdf.text,
                    page_count: Some(pdf.page_count),
                    ocr: pdf.ocr,
                }
            }
            DocumentFormat::Unknown => {
                return Err(AppError::unsupported_format(name, conversion_instructions(name)))
            }
        };

        if out.text.trim().is_empty() {
            return Err(AppError::no_text(
                name,
                "The file contains no readable text. Export it to PDF, PPTX or DOCX and try again.",
            ));
        }
        Ok(out)
    }
}

/// Runs a synchronous parser on the blocking pool. A panicking parser fails
/// only its own file.
async fn parse_off_runtime<T, F>(file: &FileDescriptor, parse: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&str, &[u8]) -> AppResult<T> + Send + 'static,
{
    let name = file.name.clone();
    let bytes = file.raw_bytes.clone();
    tokio::task::spawn_blocking(move || parse(name.as_str(), &bytes[..]))
        .await
        .map_err(|e| AppError::processing(format!("{}: parser task failed: {e}", file.name)))?
}

fn gate_error(file: &FileDescriptor, config: &Config, format: DocumentFormat) -> AppError {
    if file.byte_size > config.max_file_size_bytes() {
        AppError::FileTooLarge {
            size: file.byte_size / (1024 * 1024),
            limit: config.max_file_size_mb,
        }
    } else if file.byte_size < config.min_file_size_bytes {
        AppError::FileTooSmall {
            size: file.byte_size,
            minimum: config.min_file_size_bytes,
        }
    } else {
        debug!(?format, "format rejected by upload gate");
        AppError::unsupported_format(&file.name, conversion_instructions(&file.name))
    }
}
