pub mod format_detector;
pub mod ocr_pool;
pub mod ocr_service;
pub mod office;
pub mod orchestrator;
pub mod page_stream;
pub mod pdf_document;
pub mod pdf_processor;
pub mod ppt_parser;
pub mod text_stats;

pub use format_detector::{detect_format, validate_file};
pub use ocr_pool::{Deadline, OcrWorker, OcrWorkerPool};
pub use ocr_service::{OcrEngine, OcrEngineFactory, TesseractEngine, TesseractFactory};
pub use orchestrator::{Extractor, ProgressCallback};
pub use page_stream::PageStreamProcessor;
pub use pdf_document::{LocalPdf, LocalPdfLoader, PdfDocument, PdfLoader};
pub use pdf_processor::{sample_page_numbers, PdfProcessor};
