//! Error types for the doculatex library.
//!
//! Every fatal failure is a [`DocuLatexError`]. Each variant belongs to exactly
//! one [`ErrorKind`], and the kind carries the stable string tag
//! (`FILE_ERROR`, `AUTH_ERROR`, …) that a front end switches on to pick the
//! message shown to the user.
//!
//! ## Why a tag taxonomy on top of the enum?
//!
//! Remote failures arrive as free-form strings from the provider. They are
//! classified exactly once, after the retry loop gives up, into a small fixed
//! set of kinds. UI code then only needs [`DocuLatexError::user_message`] and
//! never has to parse provider errors itself.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the doculatex library.
#[derive(Debug, Error)]
pub enum DocuLatexError {
    // ── File errors ───────────────────────────────────────────────────────
    /// The input could not be read, rasterised or decoded.
    #[error("Cannot read '{file}': {detail}")]
    FileError { file: String, detail: String },

    /// The input has a MIME type outside the accepted set.
    #[error("Unsupported file type '{mime_type}' for '{file}'\nAccepted: PDF, JPEG, PNG, WEBP, HEIC.")]
    UnsupportedFileType { file: String, mime_type: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install pdfium for your platform, or\n\
  • set PDFIUM_LIB_PATH=/path/to/dir/containing/libpdfium.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Remote errors ─────────────────────────────────────────────────────
    /// Missing, malformed or rejected API key.
    #[error("Authentication failed: {detail}\nSet GEMINI_API_KEY or run `doculatex key set <KEY>`.")]
    AuthError { detail: String },

    /// The provider rejected the call for quota or rate reasons.
    #[error("Quota exceeded: {detail}")]
    QuotaError { detail: String },

    /// The provider kept failing with transient server errors.
    #[error("Remote service unavailable after {attempts} attempt(s): {detail}")]
    ServerError { attempts: u32, detail: String },

    /// The provider refused the content on policy grounds.
    #[error("Content blocked by the provider's safety policy: {detail}")]
    SafetyError { detail: String },

    /// The call never reached the provider.
    #[error("Network failure: {detail}\nCheck your internet connection.")]
    NetworkError { detail: String },

    /// Any other remote failure, including an empty reply.
    #[error("LLM API error: {detail}")]
    ApiError { detail: String },

    // ── Product gate ──────────────────────────────────────────────────────
    /// Trial conversions used up and the product is not activated.
    #[error("Trial exhausted: {used}/{limit} conversions used.\nRun `doculatex activate <CODE>` to unlock.")]
    TrialExhausted { used: u32, limit: u32 },

    /// An edit was attempted while the document is locked.
    #[error("Editing is locked. Activate the product to bind images or edit text.")]
    EditingLocked,

    // ── Local I/O ─────────────────────────────────────────────────────────
    /// Local key-value store could not be read or written.
    #[error("Storage error at '{path}': {detail}")]
    Storage { path: PathBuf, detail: String },

    /// A history entry with this id does not exist.
    #[error("No history entry with id '{0}'")]
    HistoryNotFound(String),

    /// The document builder failed.
    #[error("Export failed: {0}")]
    ExportFailed(String),

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// The closed set of failure categories a front end distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    File,
    Auth,
    Quota,
    Server,
    Safety,
    Network,
    Api,
    TrialExhausted,
    Locked,
    Config,
    Storage,
    Export,
    Internal,
}

impl ErrorKind {
    /// Stable string tag, suitable for logs and JSON output.
    pub fn tag(self) -> &'static str {
        match self {
            ErrorKind::File => "FILE_ERROR",
            ErrorKind::Auth => "AUTH_ERROR",
            ErrorKind::Quota => "QUOTA_ERROR",
            ErrorKind::Server => "SERVER_ERROR",
            ErrorKind::Safety => "SAFETY_ERROR",
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Api => "API_ERROR",
            ErrorKind::TrialExhausted => "TRIAL_EXHAUSTED",
            ErrorKind::Locked => "EDITING_LOCKED",
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::Storage => "STORAGE_ERROR",
            ErrorKind::Export => "EXPORT_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl DocuLatexError {
    /// Shorthand for the most common file-boundary error.
    pub fn file(file: impl Into<String>, detail: impl fmt::Display) -> Self {
        DocuLatexError::FileError {
            file: file.into(),
            detail: detail.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DocuLatexError::FileError { .. }
            | DocuLatexError::UnsupportedFileType { .. }
            | DocuLatexError::PdfiumBindingFailed(_) => ErrorKind::File,
            DocuLatexError::AuthError { .. } => ErrorKind::Auth,
            DocuLatexError::QuotaError { .. } => ErrorKind::Quota,
            DocuLatexError::ServerError { .. } => ErrorKind::Server,
            DocuLatexError::SafetyError { .. } => ErrorKind::Safety,
            DocuLatexError::NetworkError { .. } => ErrorKind::Network,
            DocuLatexError::ApiError { .. } => ErrorKind::Api,
            DocuLatexError::TrialExhausted { .. } => ErrorKind::TrialExhausted,
            DocuLatexError::EditingLocked => ErrorKind::Locked,
            DocuLatexError::InvalidConfig(_) => ErrorKind::Config,
            DocuLatexError::Storage { .. } | DocuLatexError::HistoryNotFound(_) => {
                ErrorKind::Storage
            }
            DocuLatexError::ExportFailed(_) | DocuLatexError::OutputWriteFailed { .. } => {
                ErrorKind::Export
            }
            DocuLatexError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn tag(&self) -> &'static str {
        self.kind().tag()
    }

    /// Localised message for end users.
    ///
    /// The product ships in Vietnamese; these strings are what the
    /// status banner shows. `Display` stays English for logs.
    pub fn user_message(&self) -> String {
        match self {
            DocuLatexError::UnsupportedFileType { .. } => {
                "Chỉ hỗ trợ các định dạng file PDF, JPG, PNG và WEBP.".to_string()
            }
            DocuLatexError::TrialExhausted { limit, .. } => format!(
                "Bạn đã dùng hết {limit} lượt chuyển đổi miễn phí. Vui lòng nhập mã kích hoạt."
            ),
            DocuLatexError::ApiError { detail } => format!("Lỗi xử lý AI: {detail}"),
            other => match other.kind() {
                ErrorKind::File => {
                    "Lỗi File: Không thể đọc file. File có thể bị hỏng hoặc có mật khẩu."
                        .to_string()
                }
                ErrorKind::Auth => "Lỗi xác thực: Thiếu hoặc sai API Key.".to_string(),
                ErrorKind::Quota => {
                    "Hệ thống bận: Đã vượt quá giới hạn yêu cầu. Vui lòng thử lại sau.".to_string()
                }
                ErrorKind::Server => {
                    "Lỗi máy chủ: Dịch vụ AI hiện không khả dụng. Vui lòng thử lại sau."
                        .to_string()
                }
                ErrorKind::Safety => {
                    "Chính sách nội dung: Tài liệu bị từ chối do vi phạm chính sách an toàn."
                        .to_string()
                }
                ErrorKind::Network => {
                    "Lỗi mạng: Không thể kết nối tới dịch vụ AI. Kiểm tra kết nối Internet."
                        .to_string()
                }
                ErrorKind::Locked => {
                    "Ứng dụng đang khóa. Vui lòng kích hoạt để chỉnh sửa.".to_string()
                }
                _ => format!("Đã xảy ra lỗi: {other}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_kinds_have_expected_tags() {
        let cases = [
            (DocuLatexError::AuthError { detail: "x".into() }, "AUTH_ERROR"),
            (DocuLatexError::QuotaError { detail: "x".into() }, "QUOTA_ERROR"),
            (
                DocuLatexError::ServerError {
                    attempts: 3,
                    detail: "x".into(),
                },
                "SERVER_ERROR",
            ),
            (DocuLatexError::SafetyError { detail: "x".into() }, "SAFETY_ERROR"),
            (DocuLatexError::NetworkError { detail: "x".into() }, "NETWORK_ERROR"),
            (DocuLatexError::ApiError { detail: "x".into() }, "API_ERROR"),
        ];
        for (err, tag) in cases {
            assert_eq!(err.tag(), tag, "{err}");
        }
    }

    #[test]
    fn file_boundary_errors_share_file_kind() {
        assert_eq!(DocuLatexError::file("a.pdf", "corrupt").kind(), ErrorKind::File);
        let unsupported = DocuLatexError::UnsupportedFileType {
            file: "a.gif".into(),
            mime_type: "image/gif".into(),
        };
        assert_eq!(unsupported.kind(), ErrorKind::File);
        assert_eq!(
            DocuLatexError::PdfiumBindingFailed("missing".into()).tag(),
            "FILE_ERROR"
        );
    }

    #[test]
    fn api_message_carries_detail() {
        let e = DocuLatexError::ApiError {
            detail: "empty response".into(),
        };
        assert!(e.user_message().contains("empty response"));
    }

    #[test]
    fn server_error_display_mentions_attempts() {
        let e = DocuLatexError::ServerError {
            attempts: 3,
            detail: "503 overloaded".into(),
        };
        assert!(e.to_string().contains("3 attempt"));
        assert!(e.user_message().starts_with("Lỗi máy chủ"));
    }

    #[test]
    fn unsupported_type_message_lists_formats() {
        let e = DocuLatexError::UnsupportedFileType {
            file: "notes.txt".into(),
            mime_type: "text/plain".into(),
        };
        assert!(e.user_message().contains("PDF, JPG, PNG"));
    }
}
