use axum::{extract::State, http::StatusCode, response::Json};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use crate::error::AppResult;
use crate::handlers::AppState;
use crate::services::ocr_service::is_tesseract_available;
use crate::services::pdf_document::is_pdftoppm_available;

/// Health check endpoint
pub async fn health_handler(State(state): State<AppState>) -> AppResult<Json<Value>> {
    info!("Health check requested");

    let config = state.extractor.config();
    let pool = state.extractor.pool();
    let (tesseract, pdftoppm) = tokio::join!(
        is_tesseract_available(&config.tesseract_path),
        is_pdftoppm_available(&config.pdftoppm_path),
    );

    let limiter = state.limiter.metrics();
    let rejection_rate = if limiter.total_requests > 0 {
        (limiter.rejected_requests as f64 / limiter.total_requests as f64 * 100.0).round() / 100.0
    } else {
        0.0
    };

    // text formats never need the external engines
    let status = if tesseract && pdftoppm { "healthy" } else { "degraded" };

    let response = json!({
        "status": status,
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "ocr_engine": tesseract,
            "pdf_renderer": pdftoppm,
        },
        "ocr_pool": {
            "size": pool.size(),
            "initialized": pool.is_initialized(),
            "calls": pool.calls(),
            "worker_loads": pool.worker_loads(),
        },
        "rate_limiting": {
            "total_requests": limiter.total_requests,
            "rejected_requests": limiter.rejected_requests,
            "available_permits": limiter.available_permits,
            "rejection_rate": rejection_rate,
        },
    });

    info!(
        status,
        ocr_available = tesseract,
        renderer_available = pdftoppm,
        "Health check completed"
    );

    Ok(Json(response))
}

/// Ready once the OCR workers are up.
pub async fn ready_handler(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    if state.extractor.pool().is_initialized() {
        Ok(StatusCode::OK)
    } else {
        info!("Readiness check failed - OCR pool not initialized");
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
