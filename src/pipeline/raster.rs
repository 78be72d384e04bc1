//! Rasterisation: turn an input file into compressed page images.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! async-aware. Every page render runs in `tokio::task::spawn_blocking` so the
//! Tokio worker threads never stall.
//!
//! ## Why batches?
//!
//! A 30-page exam rendered all at once would hold 30 uncompressed bitmaps in
//! memory. Pages are rendered in fixed-size batches, each awaited in full
//! before the next starts, and the driver yields between batches. Pages
//! finish in any order inside a batch; the result is sorted by page number
//! at the end.
//!
//! ## Why a `PageSource` trait?
//!
//! Batching and ordering are the interesting logic here, and they do not
//! depend on pdfium. Tests drive them with an in-memory source.

use crate::binder::ImagePayload;
use crate::config::ConversionConfig;
use crate::error::DocuLatexError;
use crate::pipeline::encode::{encode_jpeg, encode_png, UploadInput};
use crate::pipeline::input::{InputFile, InputKind};
use crate::worker::ImageOptimizer;
use futures::stream::{FuturesUnordered, StreamExt};
use image::imageops::FilterType;
use image::DynamicImage;
use pdfium_render::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One rendered page (or one optimised photo), already compressed.
#[derive(Clone, Serialize, Deserialize)]
pub struct PageImage {
    /// 1-indexed.
    pub page_num: usize,
    pub width: u32,
    pub height: u32,
    pub mime_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

impl std::fmt::Debug for PageImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImage")
            .field("page_num", &self.page_num)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PageImage {
    pub fn to_upload(&self) -> UploadInput {
        UploadInput::from_bytes(&self.mime_type, &self.data)
    }

    pub fn decode(&self) -> Result<DynamicImage, image::ImageError> {
        image::load_from_memory(&self.data)
    }
}

/// Output of [`Rasterizer::rasterize`] for one file.
#[derive(Debug, Clone)]
pub struct RasterizedInput {
    pub file_name: String,
    /// Ascending by page number.
    pub pages: Vec<PageImage>,
    /// One attachment per page, same order as `pages`.
    pub upload_inputs: Vec<UploadInput>,
    /// Page count of the source document before the page cap.
    pub source_pages: usize,
}

/// Rectangle in page-image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

// ── Page sources ─────────────────────────────────────────────────────────────

/// Something that can rasterise pages on demand.
///
/// `render_page` is blocking and is always called from `spawn_blocking`.
pub trait PageSource: Send + Sync + 'static {
    fn page_count(&self) -> usize;

    /// Render the page at 0-based `index`.
    fn render_page(&self, index: usize) -> Result<DynamicImage, DocuLatexError>;
}

/// Bind pdfium from `PDFIUM_LIB_PATH` if set, else from the system library path.
pub fn bind_pdfium() -> Result<Pdfium, DocuLatexError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(dir) if !dir.is_empty() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(&dir))
        }
        _ => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| DocuLatexError::PdfiumBindingFailed(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

/// Pages of an in-memory PDF, rendered through pdfium.
///
/// The document is reopened per page so each blocking task owns its own
/// pdfium handle.
pub struct PdfiumSource {
    name: String,
    bytes: Arc<Vec<u8>>,
    password: Option<String>,
    scale: f32,
    max_width: u32,
    page_count: usize,
}

impl PdfiumSource {
    /// Open the document and count its pages. Blocking.
    pub fn open(
        name: impl Into<String>,
        bytes: Vec<u8>,
        password: Option<String>,
        scale: f32,
        max_width: u32,
    ) -> Result<Self, DocuLatexError> {
        let name = name.into();
        let pdfium = bind_pdfium()?;
        let page_count = {
            let document = pdfium
                .load_pdf_from_byte_slice(&bytes, password.as_deref())
                .map_err(|e| pdf_open_error(&name, password.is_some(), e))?;
            document.pages().len() as usize
        };
        info!("PDF '{}' loaded: {} pages", name, page_count);

        Ok(Self {
            name,
            bytes: Arc::new(bytes),
            password,
            scale,
            max_width,
            page_count,
        })
    }
}

fn pdf_open_error(name: &str, had_password: bool, e: PdfiumError) -> DocuLatexError {
    let detail = format!("{e:?}");
    if detail.to_lowercase().contains("password") {
        let reason = if had_password {
            "wrong PDF password"
        } else {
            "PDF is encrypted and requires a password"
        };
        DocuLatexError::file(name, reason)
    } else {
        DocuLatexError::file(name, format!("corrupt PDF: {detail}"))
    }
}

impl PageSource for PdfiumSource {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn render_page(&self, index: usize) -> Result<DynamicImage, DocuLatexError> {
        let pdfium = bind_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(&self.bytes, self.password.as_deref())
            .map_err(|e| pdf_open_error(&self.name, self.password.is_some(), e))?;

        let page = document.pages().get(index as u16).map_err(|e| {
            DocuLatexError::file(&self.name, format!("page {}: {e:?}", index + 1))
        })?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.scale)
            .set_maximum_width(self.max_width as i32);

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            DocuLatexError::file(&self.name, format!("render page {}: {e:?}", index + 1))
        })?;

        Ok(bitmap.as_image())
    }
}

// ── Batched rendering ────────────────────────────────────────────────────────

fn render_one<S: PageSource>(
    source: &S,
    index: usize,
    quality: u8,
) -> Result<PageImage, DocuLatexError> {
    let img = source.render_page(index)?;
    let data = encode_jpeg(&img, quality)
        .map_err(|e| DocuLatexError::Internal(format!("JPEG encode page {}: {e}", index + 1)))?;
    debug!("Rendered page {} → {}x{} px", index + 1, img.width(), img.height());
    Ok(PageImage {
        page_num: index + 1,
        width: img.width(),
        height: img.height(),
        mime_type: "image/jpeg".to_string(),
        data,
    })
}

/// Render the first `limit` pages of `source` in batches of `batch_size`.
///
/// Returns pages sorted by page number. The first page failure aborts the
/// whole render.
pub async fn render_in_batches<S: PageSource>(
    source: Arc<S>,
    limit: usize,
    batch_size: usize,
    quality: u8,
) -> Result<Vec<PageImage>, DocuLatexError> {
    let count = source.page_count().min(limit);
    let indices: Vec<usize> = (0..count).collect();
    let mut pages = Vec::with_capacity(count);

    for batch in indices.chunks(batch_size.max(1)) {
        let mut in_flight: FuturesUnordered<_> = batch
            .iter()
            .map(|&idx| {
                let src = Arc::clone(&source);
                tokio::task::spawn_blocking(move || render_one(src.as_ref(), idx, quality))
            })
            .collect();

        while let Some(joined) = in_flight.next().await {
            let page = joined
                .map_err(|e| DocuLatexError::Internal(format!("Render task panicked: {e}")))??;
            pages.push(page);
        }
        debug!("Batch of {} page(s) done", batch.len());
        tokio::task::yield_now().await;
    }

    pages.sort_by_key(|p| p.page_num);
    Ok(pages)
}

// ── Standalone images ────────────────────────────────────────────────────────

/// Downscale to at most `max_width` (never upscale) and re-encode as JPEG.
pub fn optimize_image(bytes: &[u8], max_width: u32, quality: u8) -> Result<PageImage, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let img = if img.width() > max_width {
        let height = ((img.height() as u64 * max_width as u64) / img.width() as u64).max(1) as u32;
        debug!(
            "Downscaling {}x{} → {}x{}",
            img.width(),
            img.height(),
            max_width,
            height
        );
        img.resize_exact(max_width, height, FilterType::Triangle)
    } else {
        img
    };
    let data = encode_jpeg(&img, quality)?;
    Ok(PageImage {
        page_num: 1,
        width: img.width(),
        height: img.height(),
        mime_type: "image/jpeg".to_string(),
        data,
    })
}

// ── Cropping ─────────────────────────────────────────────────────────────────

/// Cut `rect` out of an encoded image as a PNG payload.
///
/// The rectangle is clamped to the image bounds; an empty intersection is an
/// error.
pub fn crop_image(bytes: &[u8], rect: CropRect) -> Result<ImagePayload, DocuLatexError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| DocuLatexError::file("crop source", e))?;

    if rect.x >= img.width() || rect.y >= img.height() {
        return Err(DocuLatexError::file(
            "crop source",
            format!(
                "crop origin ({}, {}) lies outside the {}x{} image",
                rect.x,
                rect.y,
                img.width(),
                img.height()
            ),
        ));
    }

    let (x1, y1) = (rect.x, rect.y);
    let x2 = rect.x.saturating_add(rect.width).min(img.width());
    let y2 = rect.y.saturating_add(rect.height).min(img.height());

    if x2 <= x1 || y2 <= y1 {
        return Err(DocuLatexError::file(
            "crop source",
            format!("invalid crop region: ({x1}, {y1}) to ({x2}, {y2})"),
        ));
    }

    let cropped = img.crop_imm(x1, y1, x2 - x1, y2 - y1);
    let png = encode_png(&cropped).map_err(|e| DocuLatexError::Internal(format!("PNG encode: {e}")))?;
    Ok(ImagePayload::new("image/png", png))
}

// ── Rasterizer ───────────────────────────────────────────────────────────────

/// Converts accepted input files into page images and upload inputs.
///
/// Owns the background [`ImageOptimizer`]; must be created inside a Tokio
/// runtime.
pub struct Rasterizer {
    render_scale: f32,
    max_rendered_pixels: u32,
    max_pages: usize,
    batch_size: usize,
    quality: u8,
    password: Option<String>,
    optimizer: ImageOptimizer,
}

impl Rasterizer {
    pub fn new(config: &ConversionConfig) -> Result<Self, DocuLatexError> {
        Ok(Self {
            render_scale: config.render_scale,
            max_rendered_pixels: config.max_rendered_pixels,
            max_pages: config.max_pages,
            batch_size: config.render_batch_size,
            quality: config.jpeg_quality,
            password: config.password.clone(),
            optimizer: ImageOptimizer::spawn(config.max_image_width, config.jpeg_quality)?,
        })
    }

    /// Rasterise one file. Every failure surfaces as a file-kind error.
    pub async fn rasterize(&self, file: &InputFile) -> Result<RasterizedInput, DocuLatexError> {
        let (pages, source_pages) = match file.kind() {
            InputKind::Pdf => self.rasterize_pdf(file).await,
            InputKind::Image => self.rasterize_image(file).await.map(|p| (vec![p], 1)),
        }
        .map_err(|e| into_file_error(&file.name, e))?;

        let upload_inputs = pages.iter().map(PageImage::to_upload).collect();
        Ok(RasterizedInput {
            file_name: file.name.clone(),
            pages,
            upload_inputs,
            source_pages,
        })
    }

    async fn rasterize_pdf(&self, file: &InputFile) -> Result<(Vec<PageImage>, usize), DocuLatexError> {
        let name = file.name.clone();
        let bytes = file.bytes.clone();
        let password = self.password.clone();
        let scale = self.render_scale;
        let max_width = self.max_rendered_pixels;

        let source = tokio::task::spawn_blocking(move || {
            PdfiumSource::open(name, bytes, password, scale, max_width)
        })
        .await
        .map_err(|e| DocuLatexError::Internal(format!("Open task panicked: {e}")))??;

        let total = source.page_count();
        if total == 0 {
            return Err(DocuLatexError::file(&file.name, "PDF has no pages"));
        }
        if total > self.max_pages {
            warn!(
                "'{}' has {} pages; only the first {} are converted",
                file.name, total, self.max_pages
            );
        }

        let pages =
            render_in_batches(Arc::new(source), self.max_pages, self.batch_size, self.quality)
                .await?;
        Ok((pages, total))
    }

    async fn rasterize_image(&self, file: &InputFile) -> Result<PageImage, DocuLatexError> {
        if file.mime_type == "image/heic" {
            // No HEIC decoder here; the model reads it natively.
            debug!("'{}' is HEIC, sent as-is", file.name);
            return Ok(PageImage {
                page_num: 1,
                width: 0,
                height: 0,
                mime_type: file.mime_type.clone(),
                data: file.bytes.clone(),
            });
        }
        self.optimizer.optimize(&file.name, file.bytes.clone()).await
    }
}

fn into_file_error(name: &str, e: DocuLatexError) -> DocuLatexError {
    match e {
        DocuLatexError::FileError { .. }
        | DocuLatexError::UnsupportedFileType { .. }
        | DocuLatexError::PdfiumBindingFailed(_) => e,
        other => DocuLatexError::file(name, other),
    }
}
