//! Conversion results.

use crate::pipeline::raster::PageImage;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Token accounting for one or more remote calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub response_tokens: u64,
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.response_tokens += rhs.response_tokens;
    }
}

/// Per-run statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    pub files: usize,
    /// Page images sent to the model, across all files.
    pub pages_sent: usize,
    /// Pages dropped by the page cap.
    pub pages_skipped: usize,
    pub placeholders: usize,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}

/// The canonical text of a finished conversion.
///
/// Immutable once produced; a new conversion or a manual edit replaces it
/// wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Display name: the file name, or names joined with ", ".
    pub file_name: String,
    pub text: String,
    pub usage: TokenUsage,
    pub stats: ConversionStats,
    /// Every page image sent, in upload order. Source for cropped figures.
    #[serde(skip)]
    pub pages: Vec<PageImage>,
}

impl ConversionOutput {
    /// Number of `[[IMAGE]]` slots in the text.
    pub fn placeholder_count(&self) -> usize {
        crate::binder::scan_placeholders(&self.text).len()
    }
}
