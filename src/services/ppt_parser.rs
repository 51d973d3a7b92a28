//! Text extraction from legacy binary PowerPoint (.ppt) files.
//!
//! A .ppt file is an OLE2 compound file. Slide text lives in the
//! `PowerPoint Document` stream as a flat sequence of records, each with an
//! 8-byte header:
//!
//! | bytes | field |
//! |-------|-------|
//! | 0-1   | `recVer` (low nibble) and `recInstance` (high 12 bits), LE |
//! | 2-3   | `recType`, LE u16 |
//! | 4-7   | `recLen`, LE u32 |
//!
//! Containers (`recVer == 0xF`) hold further records, so the scanner steps
//! into them by simply continuing after the header. Atoms are skipped by
//! `recLen` unless they carry text.

use std::io::{Cursor, Read};

use tracing::{debug, warn};

use crate::error::{AppError, AppResult};

pub const POWERPOINT_STREAM: &str = "PowerPoint Document";

pub const RT_TEXT_CHARS_ATOM: u16 = 0x0FA0;
pub const RT_TEXT_BYTES_ATOM: u16 = 0x0FA8;

const RECORD_HEADER_LEN: usize = 8;
const CONTAINER_VERSION: u8 = 0xF;
/// Records claiming more than this are treated as stream corruption.
pub const MAX_RECORD_LEN: usize = 10 * 1024 * 1024;
const MIN_BLOCK_CHARS: usize = 2;
const MIN_PRINTABLE_RATIO: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub instance: u16,
    pub rec_type: u16,
    pub len: usize,
}

impl RecordHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < RECORD_HEADER_LEN {
            return None;
        }
        let ver_inst = u16::from_le_bytes([bytes[0], bytes[1]]);
        Some(Self {
            version: (ver_inst & 0x000F) as u8,
            instance: ver_inst >> 4,
            rec_type: u16::from_le_bytes([bytes[2], bytes[3]]),
            len: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize,
        })
    }

    pub fn is_container(&self) -> bool {
        self.version == CONTAINER_VERSION
    }
}

/// A record as seen by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record<'a> {
    /// Header only; children follow in the stream.
    Container(RecordHeader),
    TextBytes(&'a [u8]),
    TextChars(&'a [u8]),
    /// Any other atom. Always skippable by its length.
    Unknown(RecordHeader),
}

/// Sequential record scanner over a `PowerPoint Document` stream.
///
/// Stops at stream exhaustion or at the first header whose length is
/// impossible; everything read before that point is still yielded.
pub struct RecordScanner<'a> {
    data: &'a [u8],
    pos: usize,
    corrupt_at: Option<usize>,
}

impl<'a> RecordScanner<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            corrupt_at: None,
        }
    }

    /// Offset of the header that halted the scan, if it was corrupt.
    pub fn corrupt_at(&self) -> Option<usize> {
        self.corrupt_at
    }
}

impl<'a> Iterator for RecordScanner<'a> {
    type Item = Record<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.corrupt_at.is_some() {
            return None;
        }
        let data = self.data;
        let header = RecordHeader::parse(data.get(self.pos..)?)?;
        let body_start = self.pos + RECORD_HEADER_LEN;
        let remaining = data.len() - body_start;

        if header.len > remaining || header.len > MAX_RECORD_LEN {
            debug!(
                offset = self.pos,
                rec_type = header.rec_type,
                rec_len = header.len,
                remaining,
                "record length exceeds stream, halting scan"
            );
            self.corrupt_at = Some(self.pos);
            return None;
        }

        if header.is_container() {
            self.pos = body_start;
            return Some(Record::Container(header));
        }

        let body = &data[body_start..body_start + header.len];
        self.pos = body_start + header.len;

        Some(match header.rec_type {
            RT_TEXT_BYTES_ATOM => Record::TextBytes(body),
            RT_TEXT_CHARS_ATOM => Record::TextChars(body),
            _ => Record::Unknown(header),
        })
    }
}

fn keep_char(c: char) -> Option<char> {
    match c {
        '\r' => Some('\n'),
        '\t' => Some(c),
        c if (c as u32) >= 0x20 => Some(c),
        _ => None,
    }
}

/// TextBytesAtom payload: one byte per character (Latin-1).
pub fn decode_text_bytes(payload: &[u8]) -> String {
    payload
        .iter()
        .filter_map(|&b| keep_char(b as char))
        .collect()
}

/// TextCharsAtom payload: UTF-16LE code units.
pub fn decode_text_chars(payload: &[u8]) -> String {
    let units = payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .filter_map(|r| r.ok())
        .filter_map(keep_char)
        .collect()
}

/// At least 80% of the characters are printable text rather than stray
/// symbols from misread binary data.
pub fn looks_like_text(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let printable = text
        .chars()
        .filter(|c| {
            c.is_alphanumeric() || c.is_whitespace() || c.is_ascii_punctuation() || is_typographic(*c)
        })
        .count();
    printable as f64 / total as f64 >= MIN_PRINTABLE_RATIO
}

fn is_typographic(c: char) -> bool {
    matches!(
        c,
        '\u{2018}'..='\u{201F}' | '\u{2022}' | '\u{2013}' | '\u{2014}' | '\u{2026}' | '\u{00A0}'..='\u{00BF}'
    )
}

/// Text blocks from a raw `PowerPoint Document` stream, in stream order.
///
/// Never fails: a corrupt length ends the scan and keeps earlier blocks.
pub fn extract_text_blocks(stream: &[u8]) -> Vec<String> {
    let mut scanner = RecordScanner::new(stream);
    let mut blocks = Vec::new();

    for record in scanner.by_ref() {
        let decoded = match record {
            Record::TextBytes(payload) => decode_text_bytes(payload),
            Record::TextChars(payload) => decode_text_chars(payload),
            Record::Container(_) | Record::Unknown(_) => continue,
        };
        let trimmed = decoded.trim();
        if trimmed.chars().count() < MIN_BLOCK_CHARS || !looks_like_text(trimmed) {
            continue;
        }
        blocks.push(trimmed.to_string());
    }

    if let Some(offset) = scanner.corrupt_at() {
        warn!(offset, blocks = blocks.len(), "PowerPoint stream truncated by corrupt record");
    }
    blocks
}

/// Extracts slide text from a .ppt file.
pub fn extract_ppt(filename: &str, bytes: &[u8]) -> AppResult<String> {
    let stream = read_powerpoint_stream(filename, bytes)?;
    let blocks = extract_text_blocks(&stream);

    debug!(filename, stream_len = stream.len(), blocks = blocks.len(), "parsed PowerPoint stream");

    if blocks.is_empty() {
        return Err(AppError::no_text(
            filename,
            "The slides may contain only images. Export the presentation to PDF or PPTX and upload that instead.",
        ));
    }
    Ok(blocks.join("\n\n"))
}

fn read_powerpoint_stream(filename: &str, bytes: &[u8]) -> AppResult<Vec<u8>> {
    let corrupted = || {
        AppError::corrupt(
            filename,
            "The file is corrupted or not a valid PowerPoint file. Try re-saving it as PPTX or PDF.",
        )
    };

    let mut compound = cfb::CompoundFile::open(Cursor::new(bytes)).map_err(|e| {
        warn!(filename, error = %e, "OLE2 container failed to parse");
        corrupted()
    })?;

    let path = format!("/{}", POWERPOINT_STREAM);
    if !compound.is_stream(&path) {
        warn!(filename, "OLE2 container has no PowerPoint Document stream");
        return Err(corrupted());
    }

    let mut stream = compound.open_stream(&path).map_err(|e| {
        warn!(filename, error = %e, "failed to open PowerPoint Document stream");
        corrupted()
    })?;
    let mut data = Vec::new();
    stream.read_to_end(&mut data).map_err(|e| {
        warn!(filename, error = %e, "failed to read PowerPoint Document stream");
        corrupted()
    })?;
    Ok(data)
}
