//! # doculatex
//!
//! Turn scanned maths exams (PDF or photos) into editable text with inline
//! LaTeX, then into a Word document with the figures put back.
//!
//! ## Why this crate?
//!
//! OCR tools flatten formulas into garbage and drop figures. Here each page
//! is rasterised and read by a vision model, which writes every formula as
//! `${...}$` and leaves an `[[IMAGE]]` tag wherever a figure was. The user
//! then pastes or crops the figures back into those slots and exports a
//! `.docx` ready for editing.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF / image
//!  │
//!  ├─ 1. Input       sniff MIME, reject unsupported files
//!  ├─ 2. Raster      pdfium pages in batches / photo downscaling
//!  ├─ 3. Encode      JPEG → base64 upload inputs
//!  ├─ 4. VLM         one request per file, retry on server errors
//!  ├─ 5. Normalize   every math span → ${...}$
//!  ├─ 6. Bind        images ↔ [[IMAGE]] slots (interactive)
//!  └─ 7. Export      blocks → .docx
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doculatex::{convert_files, export_docx, ConversionConfig, ImageBindings};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Key read from GEMINI_API_KEY
//!     let config = ConversionConfig::default();
//!     let output = convert_files(&["exam.pdf"], &config).await?;
//!     println!("{}", output.text);
//!     export_docx(&output.text, &ImageBindings::new(), "exam.docx").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doculatex` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! doculatex = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod binder;
pub mod config;
pub mod convert;
pub mod error;
pub mod export;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;
pub mod storage;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use binder::{
    ClipboardItem, ImageBindings, ImagePayload, PasteDisposition, PlaceholderBinder, SlotPaste,
    ViewMode, IMAGE_TOKEN,
};
pub use config::{ConversionConfig, ConversionConfigBuilder};
pub use convert::{
    convert_and_record, convert_files, convert_inputs, convert_sync, convert_with_backend,
    RecordedConversion,
};
pub use error::{DocuLatexError, ErrorKind};
pub use export::{export_docx, export_file_name, DocumentBuilder, DocxBuilder};
pub use output::{ConversionOutput, ConversionStats, TokenUsage};
pub use pipeline::input::InputFile;
pub use pipeline::materialize::{materialize, DocumentBlock};
pub use pipeline::normalize::normalize;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use session::{Session, SessionStatus};
pub use storage::{HistoryEntry, LocalStore, UsageState};
