//! Word export.
//!
//! [`DocumentBuilder`] turns materialized blocks into file bytes.
//! [`DocxBuilder`] is the only implementation: Times New Roman 12 pt, 6 pt
//! after each paragraph, missing-image markers in red italics.
//!
//! ## Why a trait?
//!
//! The materializer decides *what* goes into the document; the builder only
//! decides how it looks. Keeping the seam lets tests assert on blocks without
//! unzipping a `.docx`.

use crate::binder::ImageBindings;
use crate::error::DocuLatexError;
use crate::pipeline::materialize::{materialize, DocumentBlock, TextStyle};
use chrono::NaiveDate;
use docx_rs::{Docx, LineSpacing, Paragraph, Pic, Run, RunFonts};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::info;

const FONT: &str = "Times New Roman";
/// Half-points.
const FONT_SIZE: usize = 24;
/// Twentieths of a point.
const SPACING_AFTER: u32 = 120;
const MARKER_COLOR: &str = "FF0000";

/// Renders blocks into a document file.
pub trait DocumentBuilder {
    fn build(&self, blocks: &[DocumentBlock]) -> Result<Vec<u8>, DocuLatexError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DocxBuilder;

impl DocxBuilder {
    fn fonts() -> RunFonts {
        RunFonts::new().ascii(FONT).hi_ansi(FONT).east_asia(FONT).cs(FONT)
    }

    fn paragraph(run: Run) -> Paragraph {
        Paragraph::new()
            .add_run(run)
            .line_spacing(LineSpacing::new().after(SPACING_AFTER))
    }
}

impl DocumentBuilder for DocxBuilder {
    fn build(&self, blocks: &[DocumentBlock]) -> Result<Vec<u8>, DocuLatexError> {
        let mut docx = Docx::new()
            .default_fonts(Self::fonts())
            .default_size(FONT_SIZE);

        for block in blocks {
            let run = match block {
                DocumentBlock::Text(t) => {
                    let run = Run::new()
                        .add_text(t.text.as_str())
                        .fonts(Self::fonts())
                        .size(FONT_SIZE);
                    match t.style {
                        TextStyle::Body => run,
                        TextStyle::MissingImage => run.italic().color(MARKER_COLOR),
                    }
                }
                DocumentBlock::Image(img) => {
                    let pic = Pic::new_with_dimensions(img.png.clone(), img.width, img.height);
                    Run::new().add_image(pic)
                }
            };
            docx = docx.add_paragraph(Self::paragraph(run));
        }

        let mut buf = Cursor::new(Vec::new());
        docx.build()
            .pack(&mut buf)
            .map_err(|e| DocuLatexError::ExportFailed(e.to_string()))?;
        Ok(buf.into_inner())
    }
}

/// `DocuLatex_<YYYY-MM-DD>.docx`.
pub fn export_file_name(date: NaiveDate) -> String {
    format!("DocuLatex_{}.docx", date.format("%Y-%m-%d"))
}

/// Export file name for today, local time.
pub fn default_export_name() -> String {
    export_file_name(chrono::Local::now().date_naive())
}

/// Materialize `text` with `bindings` and build the `.docx` bytes.
///
/// Image decoding and resizing run on the blocking pool.
pub async fn build_docx(text: &str, bindings: &ImageBindings) -> Result<Vec<u8>, DocuLatexError> {
    let text = text.to_string();
    let bindings = bindings.clone();
    tokio::task::spawn_blocking(move || DocxBuilder.build(&materialize(&text, &bindings)))
        .await
        .map_err(|e| DocuLatexError::Internal(format!("Export task panicked: {e}")))?
}

/// Build the document and write it to `path`.
///
/// Uses atomic write (temp file + rename) so a failed export never leaves a
/// truncated `.docx` behind.
pub async fn export_docx(
    text: &str,
    bindings: &ImageBindings,
    path: impl AsRef<Path>,
) -> Result<PathBuf, DocuLatexError> {
    let path = path.as_ref();
    let bytes = build_docx(text, bindings).await?;

    let write_err = |source| DocuLatexError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    let tmp_path = path.with_extension("docx.tmp");
    tokio::fs::write(&tmp_path, &bytes).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!("Exported {} ({} bytes)", path.display(), bytes.len());
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::ImagePayload;
    use crate::pipeline::encode::encode_png;
    use image::{DynamicImage, RgbImage};

    #[test]
    fn file_name_is_dated() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(export_file_name(date), "DocuLatex_2024-03-07.docx");
    }

    #[test]
    fn docx_is_a_zip() {
        let blocks = materialize("Câu 1. ${x^2}$\n[[IMAGE]]", &ImageBindings::new());
        let bytes = DocxBuilder.build(&blocks).unwrap();
        assert_eq!(&bytes[..2], b"PK");
    }

    #[tokio::test]
    async fn export_writes_file_with_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join(export_file_name(
            NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
        ));
        let png = encode_png(&DynamicImage::ImageRgb8(RgbImage::new(800, 400))).unwrap();
        let mut bindings = ImageBindings::new();
        bindings.insert(1, ImagePayload::new("image/png", png));

        let written = export_docx("Hình vẽ:\n[[IMAGE]]", &bindings, &path)
            .await
            .unwrap();

        assert_eq!(written, path);
        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], b"PK");
        assert!(!path.with_extension("docx.tmp").exists());
    }
}
