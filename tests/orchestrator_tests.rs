mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{docx, pool, ppt_file, pptx, test_config, text_bytes_atom, words, FakeLoader, FakePdf, ScriptedFactory};
use docsift::config::Config;
use docsift::error::AppResult;
use docsift::models::{DocumentFormat, FileDescriptor};
use docsift::services::{Extractor, PdfDocument, PdfLoader, ProgressCallback};

fn extractor(loader: FakeLoader, factory: ScriptedFactory, config: Config) -> Extractor {
    let pool = pool(Arc::new(factory), config.ocr_pool_size, config.ocr_call_timeout());
    Extractor::new(config, pool, Arc::new(loader))
}

fn pdf_bytes() -> Vec<u8> {
    b"%PDF-1.4\n% fixture\n".to_vec()
}

#[tokio::test]
async fn test_batch_keeps_order_and_isolates_failures() {
    let extractor = extractor(FakeLoader::default(), ScriptedFactory::default(), test_config());
    let files = vec![
        FileDescriptor::new("a.txt", b"alpha text".to_vec()),
        FileDescriptor::new("broken.docx", b"PK\x03\x04 not really an archive".to_vec()),
        FileDescriptor::new("c.txt", b"gamma text".to_vec()),
        FileDescriptor::new("photo.png", b"\x89PNG\r\n\x1a\n....".to_vec()),
    ];

    let batch = extractor.extract_batch(files, None).await;

    let names: Vec<&str> = batch.file_details.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["a.txt", "broken.docx", "c.txt", "photo.png"]);

    let codes: Vec<Option<&str>> = batch
        .file_details
        .iter()
        .map(|f| f.error.as_ref().map(|e| e.code.as_str()))
        .collect();
    assert_eq!(
        codes,
        vec![None, Some("CORRUPT_CONTAINER"), None, Some("UNSUPPORTED_FORMAT")]
    );

    assert_eq!(
        batch.combined_text,
        "=== a.txt ===\nalpha text\n\n---\n\n=== c.txt ===\ngamma text"
    );
    assert_eq!(batch.total_word_count, 4);
    assert_eq!(batch.failed_count(), 2);
}

#[tokio::test]
async fn test_every_format_is_dispatched() {
    let loader = FakeLoader::default().with("paper.pdf", FakePdf::new(vec![words(60)]));
    let extractor = extractor(loader, ScriptedFactory::default(), test_config());

    let files = vec![
        FileDescriptor::new("paper.pdf", pdf_bytes()),
        FileDescriptor::new("deck.pptx", pptx(&[(1, &["Welcome"])])),
        FileDescriptor::new("essay.docx", docx(&["Opening line"])),
        FileDescriptor::new("old.ppt", ppt_file(&text_bytes_atom("Legacy slide"))),
        FileDescriptor::new("notes.txt", b"plain notes".to_vec()),
    ];

    let batch = extractor.extract_batch(files, None).await;
    assert_eq!(batch.failed_count(), 0);

    let details = &batch.file_details;
    assert_eq!(details[0].format, DocumentFormat::Pdf);
    assert_eq!(details[0].page_count, Some(1));
    assert_eq!(details[0].word_count, 60);
    assert!(details[0].ocr.is_none());
    assert_eq!(details[1].text, "Slide 1:\nWelcome");
    assert_eq!(details[2].text, "Opening line");
    assert_eq!(details[3].format, DocumentFormat::Ppt);
    assert_eq!(details[3].text, "Legacy slide");
    assert_eq!(details[4].text, "plain notes");
    assert_eq!(extractor.pool().calls(), 0);
}

#[tokio::test]
async fn test_scanned_pdf_reports_ocr_summary() {
    let loader = FakeLoader::default().with("scan.pdf", FakePdf::scanned(3));
    let extractor = extractor(loader, ScriptedFactory::default(), test_config());

    let content = extractor
        .extract_file(&FileDescriptor::new("scan.pdf", pdf_bytes()), &|_, _| {})
        .await;

    assert!(content.is_success());
    let summary = content.ocr.unwrap();
    assert_eq!(summary.recovered_pages, 3);
    assert!(!summary.budget_exhausted);
    assert!(content.text.starts_with("[Page 1]\ntext of page-1"));
}

#[tokio::test]
async fn test_pool_failure_does_not_stop_batch() {
    let loader = FakeLoader::default().with("scan.pdf", FakePdf::scanned(2));
    let extractor = extractor(loader, ScriptedFactory::failing(), test_config());
    let files = vec![
        FileDescriptor::new("scan.pdf", pdf_bytes()),
        FileDescriptor::new("after.txt", b"still extracted".to_vec()),
    ];

    let batch = extractor.extract_batch(files, None).await;

    let first = batch.file_details[0].error.as_ref().unwrap();
    assert_eq!(first.code, "WORKER_POOL_INIT_FAILURE");
    assert!(batch.file_details[1].is_success());
    assert_eq!(batch.combined_text, "=== after.txt ===\nstill extracted");
}

/// Loader whose parser blows up on every document.
struct PanickingLoader;

impl PdfLoader for PanickingLoader {
    fn load(&self, _filename: &str, _bytes: &[u8]) -> AppResult<Arc<dyn PdfDocument>> {
        panic!("parser bug");
    }
}

#[tokio::test]
async fn test_parser_panic_fails_only_its_file() {
    let config = test_config();
    let pool = pool(Arc::new(ScriptedFactory::default()), config.ocr_pool_size, config.ocr_call_timeout());
    let extractor = Extractor::new(config, pool, Arc::new(PanickingLoader));
    let files = vec![
        FileDescriptor::new("crash.pdf", pdf_bytes()),
        FileDescriptor::new("after.txt", b"still extracted".to_vec()),
    ];

    let batch = extractor.extract_batch(files, None).await;

    assert_eq!(batch.file_details[0].error.as_ref().unwrap().code, "PROCESSING_ERROR");
    assert!(batch.file_details[1].is_success());
    assert_eq!(batch.combined_text, "=== after.txt ===\nstill extracted");
}

#[tokio::test]
async fn test_gate_rejections_are_per_file() {
    let config = Config {
        min_file_size_bytes: 4,
        ..test_config()
    };
    let extractor = extractor(FakeLoader::default(), ScriptedFactory::default(), config);
    let files = vec![
        FileDescriptor::new("empty.txt", Vec::new()),
        FileDescriptor::new("whitespace.txt", b"   \n\t  ".to_vec()),
        FileDescriptor::new("talk.key", b"keynote bundle".to_vec()),
    ];

    let batch = extractor.extract_batch(files, None).await;
    let codes: Vec<&str> = batch
        .file_details
        .iter()
        .map(|f| f.error.as_ref().unwrap().code.as_str())
        .collect();
    assert_eq!(codes, vec!["FILE_TOO_SMALL", "NO_EXTRACTABLE_TEXT", "UNSUPPORTED_FORMAT"]);
    assert!(batch.combined_text.is_empty());
}

#[tokio::test]
async fn test_math_content_is_flagged() {
    let extractor = extractor(FakeLoader::default(), ScriptedFactory::default(), test_config());
    let files = vec![
        FileDescriptor::new("prose.txt", b"Nothing numeric here".to_vec()),
        FileDescriptor::new("hw.txt", b"Show that $x^2 + y^2 = r^2$".to_vec()),
    ];

    let batch = extractor.extract_batch(files, None).await;
    assert!(!batch.file_details[0].has_math_content);
    assert!(batch.file_details[1].has_math_content);
    assert!(batch.has_math_content);
}

#[tokio::test(start_paused = true)]
async fn test_overall_progress_is_monotonic() {
    let loader = FakeLoader::default().with("scan.pdf", FakePdf::scanned(5));
    let config = Config {
        ocr_batch_size: 2,
        ..test_config()
    };
    let factory = ScriptedFactory::with_delay(Duration::from_millis(300));
    let extractor = extractor(loader, factory, config);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let progress: ProgressCallback = Arc::new(move |pct, _| sink.lock().unwrap().push(pct));

    let files = vec![
        FileDescriptor::new("a.txt", b"first".to_vec()),
        FileDescriptor::new("scan.pdf", pdf_bytes()),
        FileDescriptor::new("c.txt", b"third".to_vec()),
    ];
    extractor.extract_batch(files, Some(progress)).await;

    let seen = seen.lock().unwrap().clone();
    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert!((seen.last().copied().unwrap() - 100.0).abs() < 1e-3);
    assert!(seen.iter().all(|p| (0.0..=100.0).contains(p)));
}
