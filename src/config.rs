//! Configuration types for document conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Rasterisation, the remote call and its
//! retry policy all read from the same struct, so two runs can be compared by
//! diffing their `Debug` output.
//!
//! The trial gate, history and credential live in [`crate::storage`] instead:
//! they are per-installation state, not per-conversion knobs.

use crate::error::DocuLatexError;
use crate::pipeline::llm::RetryPolicy;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::sync::Arc;

/// Default provider for the remote conversion call.
pub const DEFAULT_PROVIDER: &str = "gemini";

/// Default vision model.
pub const DEFAULT_MODEL: &str = "gemini-3-pro-preview";

/// Configuration for converting PDFs and images to canonical text.
///
/// # Example
/// ```rust
/// use doculatex::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .render_scale(2.0)
///     .max_pages(10)
///     .retry_backoff_ms(500)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 10);
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Scale factor applied to each PDF page when rasterising. Range: 0.5–4.0. Default: 1.5.
    ///
    /// 1.5 keeps subscripts and exponents legible for the model while a
    /// typical A4 page stays well under a megabyte as JPEG.
    pub render_scale: f32,

    /// Safety cap on the rendered page width in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Maximum number of PDF pages sent to the model. Default: 30.
    ///
    /// Pages past this limit are skipped with a warning.
    pub max_pages: usize,

    /// Number of pages rendered concurrently per batch. Default: 6.
    pub render_batch_size: usize,

    /// Standalone images wider than this are downscaled. Default: 1600.
    ///
    /// Images are never upscaled.
    pub max_image_width: u32,

    /// JPEG quality (1–100) for rendered pages and optimised images. Default: 70.
    pub jpeg_quality: u8,

    /// LLM model identifier. If None, uses [`DEFAULT_MODEL`].
    pub model: Option<String>,

    /// LLM provider name. If None along with `provider`, uses [`DEFAULT_PROVIDER`].
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Gemini API key. When set, the provider is built with this key instead
    /// of reading `GEMINI_API_KEY`.
    pub api_key: Option<String>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens the model may generate per file. Default: 16384.
    ///
    /// A whole multi-page exam is returned in one reply, so this is much
    /// larger than a per-page budget would be.
    pub max_tokens: usize,

    /// Total attempts for one remote call, including the first. Default: 3.
    ///
    /// Only transient server failures are retried.
    pub max_attempts: u32,

    /// Base retry delay in milliseconds. Default: 2000.
    ///
    /// Doubles after each failed attempt: 2 s → 4 s.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 180.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt. If None, uses [`crate::prompts::SYSTEM_INSTRUCTION`].
    pub system_prompt: Option<String>,

    /// Optional progress callback.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            render_scale: 1.5,
            max_rendered_pixels: 2000,
            max_pages: 30,
            render_batch_size: 6,
            max_image_width: 1600,
            jpeg_quality: 70,
            model: None,
            provider_name: None,
            provider: None,
            api_key: None,
            temperature: 0.1,
            max_tokens: 16384,
            max_attempts: 3,
            retry_backoff_ms: 2000,
            api_timeout_secs: 180,
            password: None,
            system_prompt: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("render_scale", &self.render_scale)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_pages", &self.max_pages)
            .field("render_batch_size", &self.render_batch_size)
            .field("max_image_width", &self.max_image_width)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("progress_callback", &self.progress_callback.is_some())
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Retry schedule for the remote call.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_ms: self.retry_backoff_ms,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn render_scale(mut self, scale: f32) -> Self {
        self.config.render_scale = scale.clamp(0.5, 4.0);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn render_batch_size(mut self, n: usize) -> Self {
        self.config.render_batch_size = n.max(1);
        self
    }

    pub fn max_image_width(mut self, px: u32) -> Self {
        self.config.max_image_width = px.max(1);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, DocuLatexError> {
        let c = &self.config;
        if c.max_attempts == 0 {
            return Err(DocuLatexError::InvalidConfig(
                "max_attempts must be ≥ 1".into(),
            ));
        }
        if c.max_pages == 0 {
            return Err(DocuLatexError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 {
            return Err(DocuLatexError::InvalidConfig(
                "api_timeout_secs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_product_constants() {
        let c = ConversionConfig::default();
        assert_eq!(c.max_pages, 30);
        assert_eq!(c.render_batch_size, 6);
        assert_eq!(c.max_image_width, 1600);
        assert_eq!(c.jpeg_quality, 70);
        assert_eq!(c.max_attempts, 3);
        assert_eq!(c.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn builder_clamps_out_of_range_values() {
        let c = ConversionConfig::builder()
            .render_scale(10.0)
            .jpeg_quality(0)
            .render_batch_size(0)
            .build()
            .unwrap();
        assert_eq!(c.render_scale, 4.0);
        assert_eq!(c.jpeg_quality, 1);
        assert_eq!(c.render_batch_size, 1);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = ConversionConfig::builder().max_attempts(0).build().unwrap_err();
        assert!(matches!(err, DocuLatexError::InvalidConfig(_)));
    }

    #[test]
    fn debug_redacts_api_key() {
        let c = ConversionConfig::builder()
            .api_key("AIzaSecret")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("AIzaSecret"));
        assert!(dbg.contains("<redacted>"));
    }

    #[test]
    fn retry_policy_mirrors_fields() {
        let c = ConversionConfig::builder()
            .max_attempts(5)
            .retry_backoff_ms(10)
            .build()
            .unwrap();
        let p = c.retry_policy();
        assert_eq!(p.max_attempts, 5);
        assert_eq!(p.backoff_ms, 10);
    }
}
