//! Magic-byte and extension based format classification, plus the upload
//! acceptance gate. Both are pure functions of their inputs.

use tracing::debug;

use crate::config::Config;
use crate::models::{
    extension_of, DetectionResult, DocumentFormat, FileDescriptor, RecommendedAction,
    ValidationOutcome, ValidationStatus,
};

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const PDF_MAGIC: &[u8] = b"%PDF";
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

const PPT_EXTENSIONS: &[&str] = &["ppt", "pps", "pot"];

pub fn detect_format(header: &[u8], filename: &str) -> DetectionResult {
    let ext = extension_of(filename);
    let ext = ext.as_deref().unwrap_or("");

    let format = if header.starts_with(ZIP_MAGIC) {
        detect_ooxml(header, ext)
    } else if header.starts_with(PDF_MAGIC) || ext == "pdf" {
        DocumentFormat::Pdf
    } else if header.starts_with(OLE2_MAGIC) && PPT_EXTENSIONS.contains(&ext) {
        DocumentFormat::Ppt
    } else if ext == "txt" {
        DocumentFormat::Txt
    } else {
        DocumentFormat::Unknown
    };

    debug!(filename, ?format, "format detected");

    let recommended_action = match format {
        DocumentFormat::Pdf => RecommendedAction::ExtractWithOcrFallback,
        DocumentFormat::Ppt => RecommendedAction::ParseLegacyBinary,
        DocumentFormat::Docx | DocumentFormat::Pptx | DocumentFormat::Txt => {
            RecommendedAction::ExtractText
        }
        DocumentFormat::Unknown => RecommendedAction::ConvertFormat,
    };

    DetectionResult {
        detected_format: format,
        mime_type: format.mime_type().to_string(),
        is_convertible: format.is_supported(),
        recommended_action,
    }
}

fn detect_ooxml(header: &[u8], ext: &str) -> DocumentFormat {
    match ext {
        "pptx" | "ppsx" | "potx" => return DocumentFormat::Pptx,
        "docx" | "dotx" => return DocumentFormat::Docx,
        _ => {}
    }
    // Part names in the first local headers usually give the package away.
    if contains(header, b"ppt/") {
        DocumentFormat::Pptx
    } else if contains(header, b"word/") {
        DocumentFormat::Docx
    } else {
        DocumentFormat::Unknown
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Conversion advice for a file the pipeline cannot read.
pub fn conversion_instructions(filename: &str) -> String {
    let advice = match extension_of(filename).as_deref() {
        Some("doc") => "Open it in Word and save as DOCX, or export to PDF.",
        Some("xls") | Some("xlsx") | Some("csv") => {
            "Spreadsheets are not supported; export the relevant sheets to PDF."
        }
        Some("key") => "Export the Keynote presentation to PPTX or PDF.",
        Some("pages") => "Export the Pages document to DOCX or PDF.",
        Some("png") | Some("jpg") | Some("jpeg") | Some("heic") => {
            "Images are not supported directly; place them in a PDF first."
        }
        Some("rtf") | Some("odt") => "Save the document as DOCX or PDF.",
        _ => "Convert the file to PDF, DOCX, PPTX, PPT or TXT and upload it again.",
    };
    advice.to_string()
}

/// Upload acceptance gate: size limits plus a supported format.
pub fn validate_file(file: &FileDescriptor, config: &Config) -> ValidationOutcome {
    let detection = detect_format(file.header(), &file.name);
    let max_bytes = config.max_file_size_bytes();

    let rejection = if file.byte_size > max_bytes {
        Some((
            format!(
                "File is {}MB; the limit is {}MB",
                file.byte_size / (1024 * 1024),
                config.max_file_size_mb
            ),
            "Split the document or compress its images before uploading.".to_string(),
        ))
    } else if file.byte_size < config.min_file_size_bytes {
        Some((
            format!(
                "File is {} bytes; it looks empty (minimum {} bytes)",
                file.byte_size, config.min_file_size_bytes
            ),
            "Check that the file was saved correctly and upload it again.".to_string(),
        ))
    } else if !detection.detected_format.is_supported() {
        Some((
            format!("{} is not a supported format", file.name),
            conversion_instructions(&file.name),
        ))
    } else {
        None
    };

    match rejection {
        Some((error, instructions)) => ValidationOutcome {
            success: false,
            detection,
            status: ValidationStatus::Error,
            instructions: Some(instructions),
            error: Some(error),
        },
        None => ValidationOutcome {
            success: true,
            detection,
            status: ValidationStatus::Ready,
            instructions: None,
            error: None,
        },
    }
}
