use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::OcrSummary;
use crate::services::ocr_pool::{Deadline, OcrWorkerPool};
use crate::services::pdf_document::PdfDocument;
use crate::services::text_stats::word_count;

/// Progress within one file, 0-100.
pub type FileProgress<'a> = &'a (dyn Fn(f32, &str) + Send + Sync);

#[derive(Debug)]
pub struct PdfExtraction {
    pub text: String,
    pub page_count: usize,
    pub ocr: Option<OcrSummary>,
}

/// Pages to OCR from a scanned document of `total_pages` pages.
///
/// Documents of at most `max_pages` pages are taken whole. Longer ones keep
/// pages 1-3 and the last two, then fill the remaining slots evenly across
/// the middle. The result is ascending and never exceeds `total_pages`.
pub fn sample_page_numbers(total_pages: usize, max_pages: usize) -> Vec<usize> {
    if total_pages <= max_pages {
        return (1..=total_pages).collect();
    }
    if max_pages < 5 {
        return (1..=max_pages).collect();
    }

    let mut pages: BTreeSet<usize> = [1, 2, 3, total_pages - 1, total_pages].into_iter().collect();

    let middle_start = 4;
    let middle_end = total_pages - 2;
    let middle_len = middle_end - middle_start + 1;
    let slots = max_pages - pages.len();

    for i in 1..=slots {
        let offset = (i * middle_len) / (slots + 1);
        pages.insert((middle_start + offset).min(middle_end));
    }
    // rounding can collide on short middles; take the first free pages
    let mut candidate = middle_start;
    while pages.len() < max_pages && candidate <= middle_end {
        pages.insert(candidate);
        candidate += 1;
    }

    pages.into_iter().collect()
}

pub fn format_ocr_pages(pages: &[(usize, String)], total_pages: usize) -> String {
    let mut text = pages
        .iter()
        .map(|(page, body)| format!("[Page {page}]\n{body}"))
        .collect::<Vec<_>>()
        .join("\n\n");
    if pages.len() < total_pages {
        text.push_str(&format!(
            "\n\n[Note: content sampled from {} of {} pages]",
            pages.len(),
            total_pages
        ));
    }
    text
}

/// Chooses between a PDF's text layer and sampled OCR, under a hard
/// wall-clock budget for the OCR path.
pub struct PdfProcessor {
    pool: Arc<OcrWorkerPool>,
    config: Config,
}

impl PdfProcessor {
    pub fn new(pool: Arc<OcrWorkerPool>, config: Config) -> Self {
        Self { pool, config }
    }

    #[tracing::instrument(skip(self, doc, progress), fields(pages = doc.page_count()))]
    pub async fn extract(
        &self,
        filename: &str,
        doc: Arc<dyn PdfDocument>,
        progress: FileProgress<'_>,
    ) -> AppResult<PdfExtraction> {
        let page_count = doc.page_count();

        let native = self.native_text(doc.as_ref()).await;
        let native_words = word_count(&native);
        progress(20.0, "Read PDF text layer");

        if native_words >= self.config.native_word_threshold {
            info!(filename, page_count, native_words, "PDF has a text layer, skipping OCR");
            return Ok(PdfExtraction {
                text: native,
                page_count,
                ocr: None,
            });
        }

        info!(
            filename,
            page_count,
            native_words,
            threshold = self.config.native_word_threshold,
            "PDF looks scanned, sampling pages for OCR"
        );
        let (pages, summary) = self.ocr_sampled(doc, progress).await?;

        if pages.is_empty() {
            if !native.trim().is_empty() {
                warn!(filename, "OCR recovered nothing, keeping sparse text layer");
                return Ok(PdfExtraction {
                    text: native,
                    page_count,
                    ocr: Some(summary),
                });
            }
            return Err(AppError::no_text(
                filename,
                "The scanned pages could not be read. Try a clearer scan, or export the original document to PDF or DOCX.",
            ));
        }

        Ok(PdfExtraction {
            text: format_ocr_pages(&pages, page_count),
            page_count,
            ocr: Some(summary),
        })
    }

    async fn native_text(&self, doc: &dyn PdfDocument) -> String {
        let mut pages = Vec::with_capacity(doc.page_count());
        for page in 1..=doc.page_count() {
            match doc.page_text(page).await {
                Ok(text) if !text.trim().is_empty() => pages.push(text.trim().to_string()),
                Ok(_) => {}
                Err(e) => debug!(page, error = %e, "native text unavailable"),
            }
        }
        pages.join("\n\n")
    }

    /// OCR of the sampled pages, batch by batch, until the budget runs out.
    async fn ocr_sampled(
        &self,
        doc: Arc<dyn PdfDocument>,
        progress: FileProgress<'_>,
    ) -> AppResult<(Vec<(usize, String)>, OcrSummary)> {
        let start = Instant::now();
        let total_pages = doc.page_count();
        let sample = sample_page_numbers(total_pages, self.config.max_ocr_pages);

        let deadline = Deadline::after(self.config.ocr_budget());
        // a pool that cannot start fails this file, not just its pages
        self.pool.init().await?;

        let mut recovered: Vec<(usize, String)> = Vec::new();
        let mut attempted = 0;
        let mut budget_exhausted = false;

        for batch in sample.chunks(self.config.ocr_batch_size) {
            if deadline.is_expired() {
                budget_exhausted = true;
                warn!(
                    attempted,
                    sampled = sample.len(),
                    budget_ms = self.config.ocr_budget_ms,
                    "OCR budget exhausted, returning partial result"
                );
                break;
            }

            let results = join_all(batch.iter().map(|&page| {
                let doc = Arc::clone(&doc);
                async move { (page, self.ocr_page(doc.as_ref(), page, &deadline).await) }
            }))
            .await;

            for (page, result) in results {
                match result {
                    Ok(text) if !text.trim().is_empty() => {
                        recovered.push((page, text.trim().to_string()))
                    }
                    Ok(_) => debug!(page, "OCR produced no text"),
                    Err(e @ AppError::WorkerPoolInit { .. }) => return Err(e),
                    Err(e) => warn!(page, error = %e, "OCR failed for page"),
                }
            }
            attempted += batch.len();

            let pct = 20.0 + 75.0 * attempted as f32 / sample.len() as f32;
            progress(pct, &format!("OCR {attempted}/{} sampled pages", sample.len()));
        }

        if deadline.is_expired() && attempted == sample.len() && recovered.len() < sample.len() {
            budget_exhausted = true;
        }

        recovered.sort_by_key(|(page, _)| *page);
        let summary = OcrSummary {
            total_pages,
            sampled_pages: sample.len(),
            recovered_pages: recovered.len(),
            budget_exhausted,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(?summary, "OCR sampling finished");
        Ok((recovered, summary))
    }

    async fn ocr_page(&self, doc: &dyn PdfDocument, page: usize, deadline: &Deadline) -> AppResult<String> {
        let image = match tokio::time::timeout(deadline.remaining(), doc.render_page(page)).await {
            Ok(image) => image?,
            Err(_) => {
                debug!(page, "OCR budget ran out while rendering");
                return Ok(String::new());
            }
        };
        self.pool.recognize(image, Some(deadline)).await
    }
}
