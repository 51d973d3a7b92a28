//! Plain text, DOCX and PPTX extraction.
//!
//! DOCX and PPTX are ZIP packages of XML parts. Text runs are `<w:t>` in
//! WordprocessingML and `<a:t>` in DrawingML; both have the local name `t`.

use std::io::{Cursor, Read};

use once_cell::sync::Lazy;
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

/// Zip-bomb guard for a single decompressed part.
const MAX_XML_PART_BYTES: u64 = 50 * 1024 * 1024;

static SLIDE_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").expect("valid slide regex"));
static NOTES_PART: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^ppt/notesSlides/notesSlide(\d+)\.xml$").expect("valid notes regex")
});

type Archive<'a> = zip::ZipArchive<Cursor<&'a [u8]>>;

pub fn extract_txt(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).replace("\r\n", "\n")
}

fn open_archive<'a>(filename: &str, bytes: &'a [u8]) -> AppResult<Archive<'a>> {
    zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| {
        warn!(filename, error = %e, "ZIP container failed to parse");
        AppError::corrupt(
            filename,
            format!("The file is corrupted or not a valid Office document ({e}). Try re-saving it or exporting to PDF."),
        )
    })
}

fn read_part(archive: &mut Archive<'_>, filename: &str, name: &str) -> AppResult<Vec<u8>> {
    let entry = archive.by_name(name).map_err(|e| {
        AppError::corrupt(filename, format!("Could not read {name}: {e}"))
    })?;
    let mut out = Vec::new();
    entry
        .take(MAX_XML_PART_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| AppError::corrupt(filename, format!("Could not read {name}: {e}")))?;
    if out.len() as u64 >= MAX_XML_PART_BYTES {
        return Err(AppError::corrupt(
            filename,
            format!("{name} exceeds the size limit of {MAX_XML_PART_BYTES} bytes"),
        ));
    }
    Ok(out)
}

/// Text of every `t` run, one output line per paragraph (`p`).
///
/// `tab` and `br` elements become a tab and a newline.
fn xml_text(xml: &[u8]) -> Result<String, quick_xml::Error> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = String::new();
    let mut in_run = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_run = true,
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_run = false,
                b"p" => {
                    if !out.is_empty() && !out.ends_with('\n') {
                        out.push('\n');
                    }
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" => out.push('\n'),
                _ => {}
            },
            Event::Text(t) if in_run => {
                out.push_str(&t.unescape()?);
            }
            Event::CData(t) if in_run => {
                out.push_str(&String::from_utf8_lossy(&t));
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim().to_string())
}

/// Generic OOXML-to-text conversion: the text of every content part in the
/// package, in part name order. Used for DOCX and as the PPTX fallback.
pub fn raw_text_from_package(filename: &str, bytes: &[u8]) -> AppResult<String> {
    let mut archive = open_archive(filename, bytes)?;

    let primary = ["word/document.xml"];
    let mut parts: Vec<String> = archive
        .file_names()
        .filter(|n| n.ends_with(".xml") && is_content_part(n))
        .map(str::to_string)
        .collect();
    parts.sort_by_key(|n| (!primary.contains(&n.as_str()), part_sort_key(n)));

    let mut sections = Vec::new();
    for part in parts {
        let xml = read_part(&mut archive, filename, &part)?;
        match xml_text(&xml) {
            Ok(text) if !text.is_empty() => sections.push(text),
            Ok(_) => {}
            Err(e) => {
                return Err(AppError::corrupt(
                    filename,
                    format!("Malformed XML in {part}: {e}"),
                ))
            }
        }
    }
    Ok(sections.join("\n\n"))
}

fn is_content_part(name: &str) -> bool {
    let content_dirs = ["word/", "ppt/slides/", "ppt/notesSlides/"];
    content_dirs.iter().any(|dir| name.starts_with(dir))
        && !name.contains("/_rels/")
        && !name.ends_with("styles.xml")
        && !name.ends_with("settings.xml")
        && !name.ends_with("fontTable.xml")
        && !name.ends_with("webSettings.xml")
        && !name.ends_with("numbering.xml")
        && !name.contains("/theme/")
}

/// Orders `slide2.xml` before `slide10.xml`.
fn part_sort_key(name: &str) -> (String, u32) {
    let base = name.trim_end_matches(".xml");
    let stem = base.trim_end_matches(|c: char| c.is_ascii_digit());
    let index = base[stem.len()..].parse().unwrap_or(0);
    (stem.to_string(), index)
}

pub fn extract_docx(filename: &str, bytes: &[u8]) -> AppResult<String> {
    let text = raw_text_from_package(filename, bytes)?;
    if text.trim().is_empty() {
        return Err(AppError::no_text(
            filename,
            "The document has no text content. If it contains scanned pages, export it to PDF.",
        ));
    }
    Ok(text)
}

fn numbered_parts(archive: &Archive<'_>, pattern: &Regex) -> Vec<(u32, String)> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let index = pattern.captures(name)?.get(1)?.as_str().parse().ok()?;
            Some((index, name.to_string()))
        })
        .collect();
    parts.sort_by_key(|(index, _)| *index);
    parts
}

pub fn extract_pptx(filename: &str, bytes: &[u8]) -> AppResult<String> {
    let mut archive = open_archive(filename, bytes)?;
    let slides = numbered_parts(&archive, &SLIDE_PART);
    let notes = numbered_parts(&archive, &NOTES_PART);

    let mut sections = Vec::new();
    for (index, part) in &slides {
        let xml = read_part(&mut archive, filename, part)?;
        match xml_text(&xml) {
            Ok(text) if !text.is_empty() => sections.push(format!("Slide {index}:\n{text}")),
            Ok(_) => {}
            Err(e) => warn!(filename, part = %part, error = %e, "skipping malformed slide"),
        }
    }
    let slides_with_text = sections.len();

    for (index, part) in &notes {
        let xml = read_part(&mut archive, filename, part)?;
        match xml_text(&xml) {
            Ok(text) if !text.is_empty() => sections.push(format!("Notes {index}:\n{text}")),
            Ok(_) => {}
            Err(e) => warn!(filename, part = %part, error = %e, "skipping malformed notes"),
        }
    }

    debug!(
        filename,
        slides = slides.len(),
        slides_with_text,
        notes = notes.len(),
        "parsed PPTX package"
    );

    if slides_with_text > 0 {
        return Ok(sections.join("\n\n"));
    }

    let fallback = raw_text_from_package(filename, bytes)?;
    if !fallback.trim().is_empty() {
        debug!(filename, "no slide text runs; using generic package text");
        return Ok(fallback);
    }

    Err(AppError::no_text(
        filename,
        "The slides appear to contain only images. Export the presentation to PDF so it can be OCR'd.",
    ))
}
