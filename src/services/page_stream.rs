//! Page-by-page PDF extraction for callers that consume results as they
//! arrive. Every page is covered (no sampling); pages go out in ascending
//! order after each batch completes.

use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::models::PageResult;
use crate::services::ocr_pool::OcrWorkerPool;
use crate::services::pdf_document::PdfDocument;
use crate::services::text_stats::visible_char_count;

pub struct PageStreamProcessor {
    pool: Arc<OcrWorkerPool>,
    config: Config,
}

impl PageStreamProcessor {
    pub fn new(pool: Arc<OcrWorkerPool>, config: Config) -> Self {
        Self { pool, config }
    }

    /// Starts processing `doc` in the background.
    ///
    /// The receiver yields each non-empty page once, in ascending page order.
    /// A pool initialization failure arrives as a final `Err`. Dropping the
    /// receiver stops the work after the current batch.
    pub fn stream(&self, filename: &str, doc: Arc<dyn PdfDocument>) -> mpsc::Receiver<AppResult<PageResult>> {
        let (tx, rx) = mpsc::channel(self.config.stream_batch_size.max(1));
        let pool = Arc::clone(&self.pool);
        let config = self.config.clone();
        let filename = filename.to_string();
        tokio::spawn(async move {
            run(pool, config, filename, doc, tx).await;
        });
        rx
    }
}

async fn run(
    pool: Arc<OcrWorkerPool>,
    config: Config,
    filename: String,
    doc: Arc<dyn PdfDocument>,
    tx: mpsc::Sender<AppResult<PageResult>>,
) {
    let total_pages = doc.page_count();
    let pages: Vec<usize> = (1..=total_pages).collect();
    let mut emitted = 0usize;
    let mut since_pause = 0usize;

    info!(filename = %filename, total_pages, "streaming PDF pages");

    for batch in pages.chunks(config.stream_batch_size.max(1)) {
        let results = join_all(
            batch
                .iter()
                .map(|&page| process_page(&pool, &config, doc.as_ref(), page)),
        )
        .await;

        for (page, result) in batch.iter().copied().zip(results) {
            match result {
                Ok((text, ocr_used)) if !text.trim().is_empty() => {
                    let item = PageResult {
                        page_number: page,
                        total_pages,
                        text,
                        ocr_used,
                    };
                    if tx.send(Ok(item)).await.is_err() {
                        debug!(filename = %filename, page, "page consumer went away, stopping");
                        return;
                    }
                    emitted += 1;
                }
                Ok(_) => debug!(page, "page produced no text"),
                Err(e @ AppError::WorkerPoolInit { .. }) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
                Err(e) => warn!(filename = %filename, page, error = %e, "page extraction failed"),
            }
        }

        since_pause += batch.len();
        if since_pause >= config.stream_pause_every_pages {
            since_pause = 0;
            // let consumers drain before rendering more pages
            tokio::time::sleep(config.stream_pause()).await;
        }
    }

    info!(filename = %filename, total_pages, emitted, "page stream finished");
}

/// Text layer first; rasterize and OCR only pages with almost no text.
async fn process_page(
    pool: &OcrWorkerPool,
    config: &Config,
    doc: &dyn PdfDocument,
    page: usize,
) -> AppResult<(String, bool)> {
    let native = doc.page_text(page).await.unwrap_or_else(|e| {
        debug!(page, error = %e, "native text unavailable");
        String::new()
    });
    if visible_char_count(&native) >= config.stream_min_native_chars {
        return Ok((native.trim().to_string(), false));
    }

    let ocr = async {
        let image = doc.render_page(page).await?;
        pool.recognize(image, None).await
    };
    match ocr.await {
        Ok(text) if !text.trim().is_empty() => Ok((text.trim().to_string(), true)),
        Ok(_) => Ok((native.trim().to_string(), false)),
        Err(e @ AppError::WorkerPoolInit { .. }) => Err(e),
        Err(e) => {
            warn!(page, error = %e, "OCR failed, keeping text layer");
            Ok((native.trim().to_string(), false))
        }
    }
}
