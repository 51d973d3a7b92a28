//! docsift document ingestion service
//!
//! Turns uploaded PDF, PPTX, PPT, DOCX and TXT files into plain text, with
//! an OCR fallback for scanned PDFs.

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
