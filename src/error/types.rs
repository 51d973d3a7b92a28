use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{filename}: unsupported format. {message}")]
    UnsupportedFormat { filename: String, message: String },

    #[error("{filename}: {message}")]
    CorruptContainer { filename: String, message: String },

    #[error("{filename}: no extractable text found. {suggestion}")]
    NoExtractableText { filename: String, suggestion: String },

    #[error("OCR worker pool failed to initialize: {message}")]
    WorkerPoolInit { message: String },

    #[error("{size} MB upload is over the {limit} MB limit")]
    FileTooLarge { size: usize, limit: usize },

    #[error("{size} byte upload is under the {minimum} byte minimum")]
    FileTooSmall { size: usize, minimum: usize },

    #[error("Unreadable upload: {message}")]
    InvalidFile { message: String },

    #[error("Request carried no file field")]
    MissingFile,

    #[error("Too many extractions in flight, retry shortly")]
    RateLimitExceeded,

    #[error("Extraction failed: {message}")]
    ProcessingError { message: String },

    #[error("Recognition failed: {message}")]
    OcrError { message: String },

    #[error("Extraction did not finish within the request deadline")]
    Timeout,

    #[error("Unexpected failure: {message}")]
    Internal { message: String },

    #[error("Invalid settings: {message}")]
    ValidationError { message: String },

    #[error("{service} is not accepting work")]
    ServiceUnavailable { service: String },
}

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str) {
        use AppError::*;
        match self {
            UnsupportedFormat { .. } => (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_FORMAT"),
            CorruptContainer { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "CORRUPT_CONTAINER"),
            NoExtractableText { .. } => (StatusCode::UNPROCESSABLE_ENTITY, "NO_EXTRACTABLE_TEXT"),
            WorkerPoolInit { .. } => (StatusCode::SERVICE_UNAVAILABLE, "WORKER_POOL_INIT_FAILURE"),
            FileTooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
            FileTooSmall { .. } => (StatusCode::BAD_REQUEST, "FILE_TOO_SMALL"),
            InvalidFile { .. } => (StatusCode::BAD_REQUEST, "INVALID_FILE"),
            MissingFile => (StatusCode::BAD_REQUEST, "MISSING_FILE"),
            RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT_EXCEEDED"),
            ProcessingError { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "PROCESSING_ERROR"),
            OcrError { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "OCR_ERROR"),
            Timeout => (StatusCode::REQUEST_TIMEOUT, "REQUEST_TIMEOUT"),
            Internal { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            ValidationError { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ServiceUnavailable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        }
    }

    /// Stable machine-readable code, also used in per-file failure records.
    pub fn error_code(&self) -> &'static str {
        self.classify().1
    }

    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }

    /// Whether the failure is confined to the file that produced it.
    ///
    /// Pool initialization and infrastructure failures are not; the batch
    /// still continues, but every OCR-dependent file after it will fail too.
    pub fn is_per_file(&self) -> bool {
        matches!(
            self,
            AppError::UnsupportedFormat { .. }
                | AppError::CorruptContainer { .. }
                | AppError::NoExtractableText { .. }
                | AppError::FileTooLarge { .. }
                | AppError::FileTooSmall { .. }
                | AppError::InvalidFile { .. }
                | AppError::ProcessingError { .. }
        )
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let detail = self.to_string();

        if status.is_server_error() {
            tracing::error!(code, status = status.as_u16(), detail = %detail, "Request failed");
        } else {
            tracing::warn!(code, status = status.as_u16(), detail = %detail, "Request rejected");
        }

        let envelope = json!({
            "success": false,
            "error": {
                "code": code,
                "message": detail,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            },
        });

        (status, Json(envelope)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(format!("{err:#}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::internal(format!("I/O failure ({:?}): {err}", err.kind()))
    }
}

impl From<tokio::time::error::Elapsed> for AppError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        AppError::Timeout
    }
}

impl AppError {
    pub fn unsupported_format(filename: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::UnsupportedFormat {
            filename: filename.into(),
            message: message.into(),
        }
    }

    pub fn corrupt(filename: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::CorruptContainer {
            filename: filename.into(),
            message: message.into(),
        }
    }

    pub fn no_text(filename: impl Into<String>, suggestion: impl Into<String>) -> Self {
        AppError::NoExtractableText {
            filename: filename.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn pool_init(message: impl Into<String>) -> Self {
        AppError::WorkerPoolInit { message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        AppError::ValidationError { message: message.into() }
    }

    pub fn service_unavailable(service: impl Into<String>) -> Self {
        AppError::ServiceUnavailable { service: service.into() }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        AppError::ProcessingError { message: message.into() }
    }

    pub fn ocr(message: impl Into<String>) -> Self {
        AppError::OcrError { message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        AppError::Internal { message: message.into() }
    }
}
