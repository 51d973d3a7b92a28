use serde::{Deserialize, Serialize};

use crate::error::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Pptx,
    Ppt,
    Txt,
    Unknown,
}

impl DocumentFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "application/pdf",
            DocumentFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            DocumentFormat::Pptx => {
                "application/vnd.openxmlformats-officedocument.presentationml.presentation"
            }
            DocumentFormat::Ppt => "application/vnd.ms-powerpoint",
            DocumentFormat::Txt => "text/plain",
            DocumentFormat::Unknown => "application/octet-stream",
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, DocumentFormat::Unknown)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendedAction {
    ExtractText,
    ExtractWithOcrFallback,
    ParseLegacyBinary,
    ConvertFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub detected_format: DocumentFormat,
    pub mime_type: String,
    pub is_convertible: bool,
    pub recommended_action: RecommendedAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Ready,
    Error,
}

/// Outcome of the upload acceptance gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationOutcome {
    pub success: bool,
    pub detection: DetectionResult,
    pub status: ValidationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What happened during OCR of a scanned document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OcrSummary {
    pub total_pages: usize,
    pub sampled_pages: usize,
    pub recovered_pages: usize,
    /// The wall-clock budget ran out before every sampled page finished.
    pub budget_exhausted: bool,
    pub elapsed_ms: u64,
}

impl OcrSummary {
    pub fn is_complete(&self) -> bool {
        self.recovered_pages >= self.total_pages
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileError {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for FileError {
    fn from(err: &AppError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Text extracted from one input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedContent {
    pub text: String,
    pub filename: String,
    pub word_count: usize,
    pub has_math_content: bool,
    pub format: DocumentFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ocr: Option<OcrSummary>,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FileError>,
}

impl ExtractedContent {
    pub fn new(filename: impl Into<String>, format: DocumentFormat, text: String) -> Self {
        let stats = crate::services::text_stats::TextStats::of(&text);
        Self {
            text,
            filename: filename.into(),
            word_count: stats.word_count,
            has_math_content: stats.has_math_content,
            format,
            page_count: None,
            ocr: None,
            processing_time_ms: 0,
            error: None,
        }
    }

    pub fn failed(filename: impl Into<String>, format: DocumentFormat, err: &AppError) -> Self {
        Self {
            text: String::new(),
            filename: filename.into(),
            word_count: 0,
            has_math_content: false,
            format,
            page_count: None,
            ocr: None,
            processing_time_ms: 0,
            error: Some(FileError::from(err)),
        }
    }

    pub fn with_page_count(mut self, page_count: Option<usize>) -> Self {
        self.page_count = page_count;
        self
    }

    pub fn with_ocr(mut self, ocr: Option<OcrSummary>) -> Self {
        self.ocr = ocr;
        self
    }

    pub fn with_processing_time(mut self, processing_time_ms: u64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated result for a multi-file upload, in submission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExtraction {
    pub combined_text: String,
    pub file_details: Vec<ExtractedContent>,
    pub total_word_count: usize,
    pub has_math_content: bool,
}

impl BatchExtraction {
    pub fn from_files(file_details: Vec<ExtractedContent>) -> Self {
        let combined_text = file_details
            .iter()
            .filter(|f| f.is_success() && !f.text.trim().is_empty())
            .map(|f| format!("=== {} ===\n{}", f.filename, f.text.trim()))
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");
        let total_word_count = file_details.iter().map(|f| f.word_count).sum();
        let has_math_content = file_details.iter().any(|f| f.has_math_content);
        Self {
            combined_text,
            file_details,
            total_word_count,
            has_math_content,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.file_details.iter().filter(|f| !f.is_success()).count()
    }
}

/// One page emitted by the streaming processor. Final once emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageResult {
    pub page_number: usize,
    pub total_pages: usize,
    pub text: String,
    pub ocr_used: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub success: bool,
    pub data: BatchExtraction,
    pub processing_time_ms: u64,
}

impl ExtractResponse {
    pub fn new(data: BatchExtraction, processing_time_ms: u64) -> Self {
        Self {
            success: true,
            data,
            processing_time_ms,
        }
    }
}
