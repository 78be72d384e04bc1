//! Image encoding: `DynamicImage` → JPEG/PNG bytes → base64 upload inputs.
//!
//! Pages and photos go to the model as JPEG. A rendered exam page at quality
//! 70 is a fraction of its PNG size, and the model reads handwriting and
//! typeset math from it just as well. Cropped figures that end up in the
//! exported document are PNG so they stay sharp in Word.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

/// One inline attachment of the remote request.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadInput {
    pub mime_type: String,
    /// Base64 body, no `data:` prefix.
    pub data: String,
}

impl std::fmt::Debug for UploadInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadInput")
            .field("mime_type", &self.mime_type)
            .field("b64_len", &self.data.len())
            .finish()
    }
}

impl UploadInput {
    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: STANDARD.encode(bytes),
        }
    }

    /// Wrap for the provider API.
    ///
    /// `detail: "high"` keeps fine print and exponents readable on providers
    /// that tile images.
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.data.clone(), self.mime_type.clone()).with_detail("high")
    }
}

/// Encode as baseline JPEG. Alpha is dropped.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))?;
    debug!(
        "Encoded {}x{} → {} bytes JPEG (q={})",
        img.width(),
        img.height(),
        buf.len(),
        quality
    );
    Ok(buf)
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn jpeg_has_soi_marker() {
        let bytes = encode_jpeg(&red(10, 10), 70).expect("encode should succeed");
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn lower_quality_is_not_larger() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 4) as u8, (y * 4) as u8, ((x ^ y) * 4) as u8])
        }));
        let hi = encode_jpeg(&img, 95).unwrap();
        let lo = encode_jpeg(&img, 20).unwrap();
        assert!(lo.len() <= hi.len());
    }

    #[test]
    fn upload_input_is_valid_base64() {
        let png = encode_png(&red(4, 4)).unwrap();
        let input = UploadInput::from_bytes("image/png", &png);
        let decoded = STANDARD.decode(&input.data).expect("valid base64");
        assert_eq!(decoded, png);
        let data = input.to_image_data();
        assert_eq!(data.mime_type, "image/png");
    }
}
