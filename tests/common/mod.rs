//! Shared fixtures: in-memory PDFs, scripted OCR engines and document
//! builders for ZIP and OLE2 containers.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use docsift::config::Config;
use docsift::error::{AppError, AppResult};
use docsift::services::{OcrEngine, OcrEngineFactory, OcrWorkerPool, PdfDocument, PdfLoader};

/// Config with limits loose enough for tiny fixtures.
pub fn test_config() -> Config {
    Config {
        min_file_size_bytes: 1,
        ..Config::default()
    }
}

pub fn words(n: usize) -> String {
    (0..n).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
}

/// A PDF held in memory. Each entry of `pages` is that page's text layer;
/// an empty string is an image-only page. Rasters are `page-N`.
pub struct FakePdf {
    pages: Vec<String>,
    rendered: Mutex<Vec<usize>>,
}

impl FakePdf {
    pub fn new(pages: Vec<String>) -> Self {
        Self {
            pages,
            rendered: Mutex::new(Vec::new()),
        }
    }

    pub fn scanned(page_count: usize) -> Self {
        Self::new(vec![String::new(); page_count])
    }

    pub fn rendered(&self) -> Vec<usize> {
        let mut pages = self.rendered.lock().unwrap().clone();
        pages.sort_unstable();
        pages
    }
}

#[async_trait]
impl PdfDocument for FakePdf {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    async fn page_text(&self, page: usize) -> AppResult<String> {
        self.pages
            .get(page.wrapping_sub(1))
            .cloned()
            .ok_or_else(|| AppError::validation(format!("page {page} out of range")))
    }

    async fn render_page(&self, page: usize) -> AppResult<Vec<u8>> {
        self.rendered.lock().unwrap().push(page);
        Ok(format!("page-{page}").into_bytes())
    }
}

/// Serves the registered fake documents by file name.
#[derive(Default)]
pub struct FakeLoader {
    docs: HashMap<String, Arc<FakePdf>>,
}

impl FakeLoader {
    pub fn with(mut self, filename: &str, doc: FakePdf) -> Self {
        self.docs.insert(filename.to_string(), Arc::new(doc));
        self
    }
}

impl PdfLoader for FakeLoader {
    fn load(&self, filename: &str, _bytes: &[u8]) -> AppResult<Arc<dyn PdfDocument>> {
        match self.docs.get(filename) {
            Some(doc) => Ok(Arc::clone(doc) as Arc<dyn PdfDocument>),
            None => Err(AppError::corrupt(filename, "not a PDF fixture")),
        }
    }
}

/// Answers `text of page-N` for raster `page-N` after `delay`; a raster
/// of `bad` fails.
#[derive(Default)]
pub struct ScriptedEngine {
    pub delay: Duration,
    pub blank: bool,
}

#[async_trait]
impl OcrEngine for ScriptedEngine {
    async fn recognize(&self, image: &[u8]) -> AppResult<String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if image == b"bad" {
            return Err(AppError::ocr("unreadable raster"));
        }
        if self.blank {
            return Ok(String::new());
        }
        Ok(format!("text of {}", String::from_utf8_lossy(image)))
    }
}

/// Builds [`ScriptedEngine`]s and counts how often it was asked to.
#[derive(Default)]
pub struct ScriptedFactory {
    pub engine_delay: Duration,
    pub init_delay: Duration,
    pub blank: bool,
    pub fail: bool,
    pub created: AtomicUsize,
    /// Highest number of recognitions in flight across all engines.
    pub max_in_flight: Arc<AtomicUsize>,
    shared_in_flight: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn with_delay(engine_delay: Duration) -> Self {
        Self {
            engine_delay,
            ..Self::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn blank() -> Self {
        Self {
            blank: true,
            ..Self::default()
        }
    }

    /// Delays every engine start-up by `delay`.
    pub fn starting_after(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Engine handle that counts concurrency across every worker of a pool.
struct SharedCountEngine {
    inner: ScriptedEngine,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl OcrEngine for SharedCountEngine {
    async fn recognize(&self, image: &[u8]) -> AppResult<String> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.inner.recognize(image).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait]
impl OcrEngineFactory for ScriptedFactory {
    async fn create(&self, worker_id: usize) -> AppResult<Arc<dyn OcrEngine>> {
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AppError::pool_init(format!("engine {worker_id} has no language data")));
        }
        Ok(Arc::new(SharedCountEngine {
            inner: ScriptedEngine {
                delay: self.engine_delay,
                blank: self.blank,
            },
            in_flight: Arc::clone(&self.shared_in_flight),
            max_in_flight: Arc::clone(&self.max_in_flight),
        }))
    }
}

pub fn pool(factory: Arc<ScriptedFactory>, size: usize, call_timeout: Duration) -> Arc<OcrWorkerPool> {
    Arc::new(OcrWorkerPool::new(factory, size, call_timeout))
}

/// A ZIP package with the given parts, in order.
pub fn zip_package(parts: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default();
    for (name, body) in parts {
        writer.start_file(*name, options).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

pub fn slide_xml(paragraphs: &[&str]) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<a:p><a:r><a:t>{p}</a:t></a:r></a:p>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<p:sld xmlns:a="http://schemas.openxmlformats.org/drawingml/2006/main" xmlns:p="http://schemas.openxmlformats.org/presentationml/2006/main"><p:cSld><p:spTree><p:sp><p:txBody>{body}</p:txBody></p:sp></p:spTree></p:cSld></p:sld>"#
    )
}

pub fn document_xml(paragraphs: &[&str]) -> String {
    let body: String = paragraphs
        .iter()
        .map(|p| format!("<w:p><w:r><w:t>{p}</w:t></w:r></w:p>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>{body}</w:body></w:document>"#
    )
}

pub fn pptx(slides: &[(u32, &[&str])]) -> Vec<u8> {
    let xml: Vec<(String, String)> = slides
        .iter()
        .map(|(n, paragraphs)| (format!("ppt/slides/slide{n}.xml"), slide_xml(paragraphs)))
        .collect();
    let mut parts: Vec<(&str, &str)> = vec![("[Content_Types].xml", "<Types/>")];
    parts.extend(xml.iter().map(|(n, b)| (n.as_str(), b.as_str())));
    zip_package(&parts)
}

pub fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body = document_xml(paragraphs);
    zip_package(&[
        ("[Content_Types].xml", "<Types/>"),
        ("word/document.xml", body.as_str()),
    ])
}

/// One PowerPoint binary record: 8-byte header then body.
pub fn record(version: u8, instance: u16, rec_type: u16, body: &[u8]) -> Vec<u8> {
    let ver_inst = (instance << 4) | (version as u16 & 0x000F);
    let mut out = ver_inst.to_le_bytes().to_vec();
    out.extend_from_slice(&rec_type.to_le_bytes());
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    out
}

pub fn container(rec_type: u16, children: &[u8]) -> Vec<u8> {
    record(0xF, 0, rec_type, children)
}

pub fn text_bytes_atom(text: &str) -> Vec<u8> {
    record(0, 0, 0x0FA8, text.as_bytes())
}

pub fn text_chars_atom(text: &str) -> Vec<u8> {
    let body: Vec<u8> = text.encode_utf16().flat_map(u16::to_le_bytes).collect();
    record(0, 0, 0x0FA0, &body)
}

/// An OLE2 compound file holding `stream` as its `PowerPoint Document`.
pub fn ppt_file(stream: &[u8]) -> Vec<u8> {
    let mut compound = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
    {
        let mut out = compound.create_stream("/PowerPoint Document").unwrap();
        out.write_all(stream).unwrap();
        out.flush().unwrap();
    }
    compound.flush().unwrap();
    compound.into_inner().into_inner()
}

/// A multipart/form-data body with one `file` field per entry.
pub fn multipart_body(boundary: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, bytes) in files {
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\n").as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
    body
}
