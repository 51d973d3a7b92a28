use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Multipart, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        Json,
    },
    Extension,
};
use futures::Stream;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::{AppError, AppResult};
use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::models::{DocumentFormat, ExtractResponse, FileDescriptor};
use crate::services::{detect_format, validate_file, ProgressCallback};

/// Accepts one or more files (`file` fields, in order) and returns their
/// combined text.
pub async fn extract_handler(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    mut multipart: Multipart,
) -> AppResult<Json<ExtractResponse>> {
    let start = Instant::now();
    info!(request_id = %request_id, "Starting extraction request");

    let _permit = state.limiter.try_acquire(&request_id)?;

    let files = read_files(&mut multipart).await.inspect_err(|e| {
        error!(request_id = %request_id, error = %e, "Failed to read multipart upload");
    })?;
    info!(request_id = %request_id, files = files.len(), "Files received");

    let progress_id = request_id.clone();
    let progress: ProgressCallback = Arc::new(move |pct, message| {
        debug!(request_id = %progress_id, progress = pct, step = message, "extraction progress");
    });

    let limit = Duration::from_secs(state.extractor.config().request_timeout_seconds);
    let batch = tokio::time::timeout(limit, state.extractor.extract_batch(files, Some(progress)))
        .await
        .inspect_err(|_| warn!(request_id = %request_id, "Extraction request timed out"))?;

    let total_time = start.elapsed().as_millis() as u64;
    info!(
        request_id = %request_id,
        total_word_count = batch.total_word_count,
        failed_files = batch.failed_count(),
        total_time_ms = total_time,
        "Request completed successfully"
    );

    Ok(Json(ExtractResponse::new(batch, total_time)))
}

/// Runs the upload acceptance gate without extracting anything.
pub async fn validate_handler(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    mut multipart: Multipart,
) -> AppResult<Json<Value>> {
    let files = read_files(&mut multipart).await?;
    let outcomes: Vec<_> = files
        .iter()
        .map(|f| validate_file(f, state.extractor.config()))
        .collect();
    let accepted = outcomes.iter().filter(|o| o.success).count();
    info!(request_id = %request_id, files = outcomes.len(), accepted, "Validation completed");

    Ok(Json(json!({
        "success": accepted == outcomes.len(),
        "data": outcomes,
    })))
}

/// Streams the pages of one PDF as server-sent events: a `page` event per
/// page in ascending order, then `done` (or `error`).
pub async fn extract_stream_handler(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    mut multipart: Multipart,
) -> AppResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let permit = state.limiter.try_acquire(&request_id)?;

    let file = read_files(&mut multipart)
        .await?
        .into_iter()
        .next()
        .ok_or(AppError::MissingFile)?;

    let outcome = validate_file(&file, state.extractor.config());
    if let Some(error) = outcome.error {
        return Err(AppError::InvalidFile { message: error });
    }
    if detect_format(file.header(), &file.name).detected_format != DocumentFormat::Pdf {
        return Err(AppError::InvalidFile {
            message: format!("{} is not a PDF; page streaming supports PDF only", file.name),
        });
    }

    let doc = state.extractor.load_pdf(&file).await?;
    info!(request_id = %request_id, file_name = %file.name, pages = doc.page_count(), "Streaming pages");
    let pages = state.extractor.page_stream().stream(&file.name, doc);

    let events = futures::stream::unfold((pages, Some(permit)), |(mut pages, permit)| async move {
        // the permit is released when the stream ends
        permit.as_ref()?;
        let event = match pages.recv().await {
            Some(Ok(page)) => {
                let event = Event::default()
                    .event("page")
                    .json_data(&page)
                    .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()));
                return Some((Ok::<_, Infallible>(event), (pages, permit)));
            }
            Some(Err(e)) => Event::default()
                .event("error")
                .data(json!({ "code": e.error_code(), "message": e.to_string() }).to_string()),
            None => Event::default().event("done").data("{}"),
        };
        Some((Ok(event), (pages, None)))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn read_files(multipart: &mut Multipart) -> AppResult<Vec<FileDescriptor>> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(|e| AppError::InvalidFile {
        message: format!("Failed to read multipart field: {}", e),
    })? {
        if !matches!(field.name(), Some("file") | Some("files")) {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let data = field.bytes().await.map_err(|e| AppError::InvalidFile {
            message: format!("Failed to read {}: {}", file_name, e),
        })?;

        debug!(file_name = %file_name, file_size = data.len(), "Received file");
        files.push(FileDescriptor::new(file_name, data));
    }

    if files.is_empty() {
        return Err(AppError::MissingFile);
    }
    Ok(files)
}
