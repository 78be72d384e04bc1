//! Input resolution: read a user-supplied file and decide what it is.
//!
//! ## Why sniff bytes instead of trusting the extension?
//!
//! Files arrive from drag-and-drop, clipboard pastes and the command line.
//! Pasted images have synthetic names, and exported scans are often renamed
//! carelessly. Magic bytes decide the MIME type; the extension is only a
//! fallback for formats with no reliable signature. Anything outside
//! [`ACCEPTED_MIME_TYPES`] is rejected here, before any rasterisation or
//! remote call.

use crate::error::DocuLatexError;
use std::path::Path;
use tracing::debug;

/// MIME types the upload surface accepts.
pub const ACCEPTED_MIME_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/heic",
];

/// Coarse classification that picks the rasterisation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Pdf,
    Image,
}

/// One file the user submitted, fully read into memory.
#[derive(Clone)]
pub struct InputFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for InputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputFile")
            .field("name", &self.name)
            .field("mime_type", &self.mime_type)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}

impl InputFile {
    /// Read and validate a local file.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, DocuLatexError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| DocuLatexError::file(&name, e))?;

        debug!("Read {} ({} bytes)", path.display(), bytes.len());
        Self::from_bytes(name, bytes, None)
    }

    /// Validate in-memory bytes. `declared` is the MIME type the host
    /// reported, if any; sniffed bytes take precedence over it.
    pub fn from_bytes(
        name: impl Into<String>,
        bytes: Vec<u8>,
        declared: Option<&str>,
    ) -> Result<Self, DocuLatexError> {
        let name = name.into();
        if bytes.is_empty() {
            return Err(DocuLatexError::file(&name, "file is empty"));
        }

        let mime_type = sniff_mime(&bytes)
            .or(declared)
            .or_else(|| mime_from_extension(&name))
            .unwrap_or("application/octet-stream")
            .to_string();

        if !is_accepted(&mime_type) {
            return Err(DocuLatexError::UnsupportedFileType {
                file: name,
                mime_type,
            });
        }

        Ok(Self {
            name,
            mime_type,
            bytes,
        })
    }

    pub fn kind(&self) -> InputKind {
        if self.mime_type == "application/pdf" {
            InputKind::Pdf
        } else {
            InputKind::Image
        }
    }
}

pub fn is_accepted(mime_type: &str) -> bool {
    ACCEPTED_MIME_TYPES.contains(&mime_type)
}

/// Identify a supported format from its leading bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    let head = &bytes[..bytes.len().min(1024)];
    if head.starts_with(b"%PDF") || head.windows(5).any(|w| w == b"%PDF-") {
        return Some("application/pdf");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("image/png");
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.len() >= 12
        && &bytes[4..8] == b"ftyp"
        && matches!(&bytes[8..12], b"heic" | b"heix" | b"heim" | b"heis" | b"mif1")
    {
        return Some("image/heic");
    }
    if bytes.starts_with(b"GIF8") {
        return Some("image/gif");
    }
    None
}

fn mime_from_extension(name: &str) -> Option<&'static str> {
    let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "pdf" => Some("application/pdf"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "webp" => Some("image/webp"),
        "heic" | "heif" => Some("image/heic"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_known_signatures() {
        assert_eq!(sniff_mime(b"%PDF-1.7\n..."), Some("application/pdf"));
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_mime(b"\x89PNG\r\n\x1a\n0000"), Some("image/png"));
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), Some("image/webp"));
        assert_eq!(sniff_mime(b"\0\0\0\x18ftypheic"), Some("image/heic"));
        assert_eq!(sniff_mime(b"hello"), None);
    }

    #[test]
    fn test_bytes_win_over_extension() {
        let f = InputFile::from_bytes("scan.pdf", b"\x89PNG\r\n\x1a\n0000".to_vec(), None).unwrap();
        assert_eq!(f.mime_type, "image/png");
        assert_eq!(f.kind(), InputKind::Image);
    }

    #[test]
    fn test_gif_rejected() {
        let err = InputFile::from_bytes("anim.gif", b"GIF89a....".to_vec(), None).unwrap_err();
        assert!(matches!(err, DocuLatexError::UnsupportedFileType { .. }));
    }

    #[test]
    fn test_text_file_rejected() {
        let err = InputFile::from_bytes("notes.txt", b"plain".to_vec(), None).unwrap_err();
        assert_eq!(err.tag(), "FILE_ERROR");
    }

    #[test]
    fn test_extension_fallback() {
        let f = InputFile::from_bytes("photo.HEIC", b"opaque".to_vec(), None).unwrap();
        assert_eq!(f.mime_type, "image/heic");
    }

    #[test]
    fn test_empty_file_rejected() {
        assert!(InputFile::from_bytes("a.pdf", Vec::new(), None).is_err());
    }

    #[tokio::test]
    async fn test_missing_path_is_file_error() {
        let err = InputFile::from_path("/definitely/not/here.pdf").await.unwrap_err();
        assert!(matches!(err, DocuLatexError::FileError { .. }));
    }
}
