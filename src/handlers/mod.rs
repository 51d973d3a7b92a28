pub mod extract;
pub mod health;

pub use extract::*;
pub use health::*;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::middleware::{request_id_middleware, RequestLimiter};
use crate::services::Extractor;

#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<Extractor>,
    pub limiter: Arc<RequestLimiter>,
}

impl AppState {
    pub fn new(extractor: Arc<Extractor>) -> Self {
        let limiter = RequestLimiter::new(extractor.config().max_concurrent_requests);
        Self {
            extractor,
            limiter: Arc::new(limiter),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    // a batch may carry several files at the per-file limit
    let body_limit = state.extractor.config().max_file_size_bytes() * 4;

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/api/v1/validate", post(validate_handler))
        .route("/api/v1/extract", post(extract_handler))
        .route("/api/v1/extract/stream", post(extract_stream_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit))
                .layer(axum::middleware::from_fn(request_id_middleware)),
        )
        .with_state(state)
}
