//! Offline end-to-end tests: real rasterisation of image inputs, real
//! normalisation, binding and export, with a scripted model backend.
//!
//! No API key or pdfium library is needed.
//!
//! Run with:
//!   cargo test --test pipeline

use base64::Engine;
use doculatex::pipeline::llm::{ConversionBackend, ConversionReply, ConversionRequest, RemoteFailure};
use doculatex::pipeline::materialize::TextStyle;
use doculatex::storage::{MAX_TRIAL_USES, USAGE_COUNT_KEY};
use doculatex::{
    convert_and_record, convert_with_backend, export_docx, materialize, normalize, ClipboardItem,
    ConversionConfig, ConversionProgressCallback, DocuLatexError, DocumentBlock, ErrorKind,
    ImagePayload, InputFile, LocalStore, PasteDisposition, PlaceholderBinder, TokenUsage,
};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

fn png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(RgbImage::new(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

fn input(name: &str, width: u32) -> InputFile {
    InputFile::from_bytes(name, png(width, 20), None).unwrap()
}

fn fast_config() -> ConversionConfig {
    ConversionConfig::builder()
        .retry_backoff_ms(1)
        .build()
        .unwrap()
}

/// Replies by the width of the first attached image, so concurrent requests
/// can be told apart. Pops scripted failures first.
struct ScriptedBackend {
    replies: Vec<(u32, &'static str)>,
    failures: Mutex<Vec<&'static str>>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    fn new(replies: Vec<(u32, &'static str)>) -> Self {
        Self {
            replies,
            failures: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_first(self, failures: Vec<&'static str>) -> Self {
        *self.failures.lock().unwrap() = failures;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ConversionBackend for ScriptedBackend {
    async fn generate(&self, request: &ConversionRequest) -> Result<ConversionReply, RemoteFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(msg) = self.failures.lock().unwrap().pop() {
            return Err(RemoteFailure::new(msg));
        }

        assert!(request.system_instruction.contains("[[IMAGE]]"));
        let first = &request.inputs[0];
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&first.data)
            .unwrap();
        let width = image::load_from_memory(&bytes).unwrap().width();
        let text = self
            .replies
            .iter()
            .find(|(w, _)| *w == width)
            .map(|(_, t)| *t)
            .unwrap_or("no script for this width");
        Ok(ConversionReply {
            text: text.to_string(),
            usage: TokenUsage {
                prompt_tokens: 100,
                response_tokens: 10,
            },
        })
    }
}

#[derive(Default)]
struct Events {
    rasterized: AtomicUsize,
    retries: AtomicUsize,
    converted: AtomicUsize,
    completed_ok: Mutex<Option<bool>>,
}

impl ConversionProgressCallback for Events {
    fn on_file_rasterized(&self, _file: &str, _pages: usize) {
        self.rasterized.fetch_add(1, Ordering::SeqCst);
    }
    fn on_retry(&self, _file: &str, _attempt: u32, _max: u32, _error: &str) {
        self.retries.fetch_add(1, Ordering::SeqCst);
    }
    fn on_file_converted(&self, _file: &str, _len: usize) {
        self.converted.fetch_add(1, Ordering::SeqCst);
    }
    fn on_conversion_complete(&self, _total: usize, success: bool) {
        *self.completed_ok.lock().unwrap() = Some(success);
    }
}

// ── Conversion ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn two_files_are_normalized_and_joined_in_upload_order() {
    let backend = ScriptedBackend::new(vec![
        (40, "```markdown\nCâu 1. $x^2 - 1=0$ [[IMAGE]]\n```"),
        (80, "Câu 2. `2x+3` và \\(y\\)\n\n\n[[IMAGE]]"),
    ]);
    let events = Arc::new(Events::default());
    let config = ConversionConfig::builder()
        .progress_callback(events.clone())
        .build()
        .unwrap();

    let files = [input("a.png", 40), input("b.png", 80)];
    let output = convert_with_backend(&backend, &files, &config).await.unwrap();

    assert_eq!(
        output.text,
        "Câu 1. ${x^2-1=0}$ [[IMAGE]]\nCâu 2. ${2x+3}$ và ${y}$\n[[IMAGE]]"
    );
    assert_eq!(output.file_name, "a.png, b.png");
    assert_eq!(output.stats.files, 2);
    assert_eq!(output.stats.pages_sent, 2);
    assert_eq!(output.stats.placeholders, 2);
    assert_eq!(output.usage.prompt_tokens, 200);
    assert_eq!(output.pages.len(), 2);

    assert_eq!(events.rasterized.load(Ordering::SeqCst), 2);
    assert_eq!(events.converted.load(Ordering::SeqCst), 2);
    assert_eq!(*events.completed_ok.lock().unwrap(), Some(true));
}

#[tokio::test]
async fn server_errors_are_retried_then_succeed() {
    let backend = ScriptedBackend::new(vec![(40, "ok ${1}$")])
        .failing_first(vec!["503 Service Unavailable", "model is overloaded"]);
    let events = Arc::new(Events::default());
    let config = ConversionConfig::builder()
        .retry_backoff_ms(1)
        .progress_callback(events.clone())
        .build()
        .unwrap();

    let output = convert_with_backend(&backend, &[input("a.png", 40)], &config)
        .await
        .unwrap();

    assert_eq!(output.text, "ok ${1}$");
    assert_eq!(backend.calls(), 3);
    assert_eq!(events.retries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn persistent_server_error_fails_after_three_attempts() {
    let backend = ScriptedBackend::new(vec![(40, "never")])
        .failing_first(vec!["500 internal error"; 5]);

    let err = convert_with_backend(&backend, &[input("a.png", 40)], &fast_config())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
    assert!(matches!(err, DocuLatexError::ServerError { attempts: 3, .. }));
    assert_eq!(backend.calls(), 3);
}

#[tokio::test]
async fn unreadable_image_fails_before_any_remote_call() {
    let backend = ScriptedBackend::new(vec![]);
    // PNG magic, garbage body
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(b"garbage");
    let broken = InputFile::from_bytes("broken.png", bytes, None).unwrap();

    let err = convert_with_backend(&backend, &[broken], &fast_config())
        .await
        .unwrap_err();

    assert_eq!(err.tag(), "FILE_ERROR");
    assert_eq!(backend.calls(), 0);
}

#[test]
fn unsupported_upload_is_rejected_with_user_message() {
    let err = InputFile::from_bytes("anim.gif", b"GIF89a....".to_vec(), None).unwrap_err();
    assert!(matches!(err, DocuLatexError::UnsupportedFileType { .. }));
    assert!(err.user_message().contains("PDF"));
}

// ── Gate + history ───────────────────────────────────────────────────────────

#[tokio::test]
async fn successful_conversion_is_saved_and_counted() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    let backend = ScriptedBackend::new(vec![(40, "Bài ${1}$")]);

    let recorded = convert_and_record(&store, &backend, &[input("exam.png", 40)], &fast_config())
        .await
        .unwrap();

    assert_eq!(recorded.usage_state.count, 1);
    let id = recorded.history_id.unwrap();
    let entry = store.history().get(&id).unwrap();
    assert_eq!(entry.file_name, "exam.png");
    assert_eq!(entry.markdown, "Bài ${1}$");
}

#[tokio::test]
async fn failed_conversion_is_neither_saved_nor_counted() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    let backend = ScriptedBackend::new(vec![]).failing_first(vec!["API key not valid"]);

    let err = convert_and_record(&store, &backend, &[input("a.png", 40)], &fast_config())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(backend.calls(), 1);
    assert!(store.history().list().unwrap().is_empty());
    assert_eq!(store.license().state().unwrap().count, 0);
}

#[tokio::test]
async fn exhausted_trial_blocks_before_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let store = LocalStore::open(dir.path()).unwrap();
    store.set_json(USAGE_COUNT_KEY, &MAX_TRIAL_USES).unwrap();
    let backend = ScriptedBackend::new(vec![(40, "x")]);

    let err = convert_and_record(&store, &backend, &[input("a.png", 40)], &fast_config())
        .await
        .unwrap_err();

    assert!(matches!(err, DocuLatexError::TrialExhausted { .. }));
    assert_eq!(backend.calls(), 0);
}

// ── Binding + export ─────────────────────────────────────────────────────────

#[tokio::test]
async fn converted_text_binds_pasted_images_and_exports() {
    let backend = ScriptedBackend::new(vec![(40, "Hình 1 [[IMAGE]]\nHình 2 [[IMAGE]]")]);
    let output = convert_with_backend(&backend, &[input("a.png", 40)], &fast_config())
        .await
        .unwrap();

    let mut binder = PlaceholderBinder::new(output.text.clone());
    binder.set_editable(true);
    assert!(binder.set_active(1));

    let clipboard = [ClipboardItem::new("image/png", png(900, 300))];
    assert_eq!(
        binder.intercept_paste(&clipboard),
        PasteDisposition::Consumed { ordinal: 1 }
    );
    // Slot 2 is next.
    assert_eq!(binder.active(), Some(2));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out.docx");
    export_docx(binder.text(), &binder.bindings(), &path)
        .await
        .unwrap();

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[..2], b"PK");
}

#[test]
fn exam_line_normalizes_binds_and_materializes_in_order() {
    let text = normalize("Câu 1. $x^2-1=0$ [[IMAGE]] tính x.");
    assert_eq!(text, "Câu 1. ${x^2-1=0}$ [[IMAGE]] tính x.");

    let mut binder = PlaceholderBinder::new(text);
    binder.set_editable(true);
    assert!(binder.bind_image(1, ImagePayload::new("image/png", png(40, 20))));

    let blocks = materialize(binder.text(), &binder.bindings());
    assert_eq!(blocks.len(), 3);
    match &blocks[0] {
        DocumentBlock::Text(t) => {
            assert_eq!(t.text, "Câu 1. ${x^2-1=0}$ ");
            assert_eq!(t.style, TextStyle::Body);
        }
        other => panic!("expected text block, got {other:?}"),
    }
    match &blocks[1] {
        DocumentBlock::Image(img) => {
            assert_eq!(img.ordinal, 1);
            assert_eq!((img.width, img.height), (40, 20));
        }
        other => panic!("expected image block, got {other:?}"),
    }
    match &blocks[2] {
        DocumentBlock::Text(t) => assert_eq!(t.text, " tính x."),
        other => panic!("expected text block, got {other:?}"),
    }
}
