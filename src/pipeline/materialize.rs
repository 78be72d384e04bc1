//! Document Materializer: canonical text + image bindings → document blocks.
//!
//! The output is format-neutral. [`crate::export`] turns blocks into a
//! `.docx`; a front end could just as well render them on screen.
//!
//! ## Slot numbering
//!
//! Slots are numbered by splitting the text on [`IMAGE_TOKEN`], left to
//! right, starting at 1. This is the same numbering the binder derives, but
//! it is recomputed here rather than taken from the binder, so a binding map
//! that went stale simply misses.

use crate::binder::{ImageBindings, ImagePayload, IMAGE_TOKEN};
use crate::pipeline::encode::encode_png;
use image::imageops::FilterType;
use tracing::{debug, warn};

/// Widest an embedded image is ever shown, in pixels.
pub const MAX_DISPLAY_WIDTH: u32 = 500;

/// Written in place of a slot that has no usable image.
pub const MISSING_IMAGE_MARKER: &str = "[Chưa có hình ảnh minh họa]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle {
    Body,
    /// Italic red.
    MissingImage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextBlock {
    pub text: String,
    pub style: TextStyle,
}

/// An image ready to embed: PNG at display size.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageBlock {
    pub ordinal: usize,
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl std::fmt::Debug for ImageBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageBlock")
            .field("ordinal", &self.ordinal)
            .field("size", &format_args!("{}x{}", self.width, self.height))
            .field("bytes", &self.png.len())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentBlock {
    Text(TextBlock),
    Image(ImageBlock),
}

impl DocumentBlock {
    fn body(text: &str) -> Self {
        DocumentBlock::Text(TextBlock {
            text: text.to_string(),
            style: TextStyle::Body,
        })
    }

    fn missing() -> Self {
        DocumentBlock::Text(TextBlock {
            text: MISSING_IMAGE_MARKER.to_string(),
            style: TextStyle::MissingImage,
        })
    }
}

/// Display size for an image of natural size `width`×`height`.
///
/// Proportional, capped at [`MAX_DISPLAY_WIDTH`], never enlarged.
pub fn display_size(width: u32, height: u32) -> (u32, u32) {
    if width <= MAX_DISPLAY_WIDTH {
        return (width, height);
    }
    let scaled = (height as u64 * MAX_DISPLAY_WIDTH as u64 / width as u64).max(1) as u32;
    (MAX_DISPLAY_WIDTH, scaled)
}

/// Split `text` into blocks, replacing each `[[IMAGE]]` with its bound image
/// or the missing-image marker.
pub fn materialize(text: &str, bindings: &ImageBindings) -> Vec<DocumentBlock> {
    let mut blocks = Vec::new();
    let mut parts = text.split(IMAGE_TOKEN);

    if let Some(first) = parts.next() {
        push_lines(&mut blocks, first);
    }
    for (idx, part) in parts.enumerate() {
        let ordinal = idx + 1;
        let block = bindings
            .get(&ordinal)
            .and_then(|payload| image_block(ordinal, payload))
            .unwrap_or_else(DocumentBlock::missing);
        blocks.push(block);
        push_lines(&mut blocks, part);
    }

    debug!("Materialized {} block(s)", blocks.len());
    blocks
}

fn push_lines(blocks: &mut Vec<DocumentBlock>, text: &str) {
    blocks.extend(
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(DocumentBlock::body),
    );
}

fn image_block(ordinal: usize, payload: &ImagePayload) -> Option<DocumentBlock> {
    let img = match image::load_from_memory(&payload.data) {
        Ok(img) => img,
        Err(e) => {
            warn!("Image for slot {} ({}) could not be decoded: {}", ordinal, payload.mime_type, e);
            return None;
        }
    };

    let (width, height) = display_size(img.width(), img.height());
    let img = if width == img.width() {
        img
    } else {
        img.resize_exact(width, height, FilterType::Triangle)
    };

    match encode_png(&img) {
        Ok(png) => Some(DocumentBlock::Image(ImageBlock {
            ordinal,
            png,
            width,
            height,
        })),
        Err(e) => {
            warn!("Image for slot {} could not be re-encoded: {}", ordinal, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};

    fn png(w: u32, h: u32) -> ImagePayload {
        let data = encode_png(&DynamicImage::ImageRgb8(RgbImage::new(w, h))).unwrap();
        ImagePayload::new("image/png", data)
    }

    fn texts(blocks: &[DocumentBlock]) -> Vec<(&str, TextStyle)> {
        blocks
            .iter()
            .filter_map(|b| match b {
                DocumentBlock::Text(t) => Some((t.text.as_str(), t.style)),
                DocumentBlock::Image(_) => None,
            })
            .collect()
    }

    #[test]
    fn display_size_caps_width_and_keeps_ratio() {
        assert_eq!(display_size(1000, 400), (500, 200));
        assert_eq!(display_size(300, 900), (300, 900));
        assert_eq!(display_size(500, 10), (500, 10));
    }

    #[test]
    fn missing_binding_becomes_marker() {
        let blocks = materialize("A\n[[IMAGE]]\nB", &ImageBindings::new());
        assert_eq!(
            texts(&blocks),
            vec![
                ("A", TextStyle::Body),
                (MISSING_IMAGE_MARKER, TextStyle::MissingImage),
                ("B", TextStyle::Body),
            ]
        );
    }

    #[test]
    fn bound_slot_becomes_scaled_image() {
        let mut bindings = ImageBindings::new();
        bindings.insert(2, png(1000, 600));
        let blocks = materialize("x [[IMAGE]] y [[IMAGE]] z", &bindings);

        assert_eq!(blocks.len(), 5);
        assert!(matches!(&blocks[1], DocumentBlock::Text(t) if t.style == TextStyle::MissingImage));
        match &blocks[3] {
            DocumentBlock::Image(img) => {
                assert_eq!(img.ordinal, 2);
                assert_eq!((img.width, img.height), (500, 300));
                let decoded = image::load_from_memory(&img.png).unwrap();
                assert_eq!(decoded.width(), 500);
            }
            other => panic!("expected image, got {other:?}"),
        }
    }

    #[test]
    fn small_image_is_not_enlarged() {
        let mut bindings = ImageBindings::new();
        bindings.insert(1, png(120, 80));
        let blocks = materialize("[[IMAGE]]", &bindings);
        assert!(matches!(&blocks[0], DocumentBlock::Image(i) if (i.width, i.height) == (120, 80)));
    }

    #[test]
    fn undecodable_binding_falls_back_to_marker() {
        let mut bindings = ImageBindings::new();
        bindings.insert(1, ImagePayload::new("image/png", b"not a png".to_vec()));
        let blocks = materialize("[[IMAGE]]", &bindings);
        assert_eq!(texts(&blocks), vec![(MISSING_IMAGE_MARKER, TextStyle::MissingImage)]);
    }

    #[test]
    fn stale_binding_is_ignored() {
        let mut bindings = ImageBindings::new();
        bindings.insert(3, png(10, 10));
        let blocks = materialize("only [[IMAGE]] here", &bindings);
        assert!(blocks.iter().all(|b| matches!(b, DocumentBlock::Text(_))));
    }

    #[test]
    fn blank_lines_produce_no_blocks() {
        let blocks = materialize("a\n\n   \nb\n", &ImageBindings::new());
        assert_eq!(texts(&blocks), vec![("a", TextStyle::Body), ("b", TextStyle::Body)]);
    }
}
