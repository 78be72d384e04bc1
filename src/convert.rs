//! Conversion entry points.
//!
//! ## Flow
//!
//! 1. Read and validate every input (MIME gate)
//! 2. Rasterise each file to page images, one file after another
//! 3. Send one remote request per file, all at once
//! 4. Normalise each reply and join them in upload order
//!
//! Steps 1–2 fail with a file-kind error before any remote call is made.
//! Step 3 is all-or-nothing: if any file's request fails after its retries,
//! the whole batch fails with that error.
//!
//! ## Why generic over the backend?
//!
//! [`convert_with_backend`] takes any [`ConversionBackend`], so the whole
//! pipeline runs offline in tests with a scripted backend. The public
//! [`convert_files`] / [`convert_inputs`] wrap it with an [`LlmBackend`].

use crate::config::{ConversionConfig, DEFAULT_PROVIDER};
use crate::error::DocuLatexError;
use crate::output::{ConversionOutput, ConversionStats, TokenUsage};
use crate::pipeline::input::InputFile;
use crate::pipeline::llm::{request_conversion, ConversionBackend, ConversionRequest, LlmBackend};
use crate::pipeline::normalize::normalize;
use crate::pipeline::raster::{RasterizedInput, Rasterizer};
use crate::prompts;
use crate::storage::{validate_api_key, LocalStore, UsageState, API_KEY_ENV};
use edgequake_llm::{GeminiProvider, LLMProvider, ProviderFactory};
use futures::future::try_join_all;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Convert local files to canonical text.
///
/// # Example
/// ```rust,no_run
/// use doculatex::{convert_files, ConversionConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::default();
/// let output = convert_files(&["exam.pdf"], &config).await?;
/// println!("{}", output.text);
/// # Ok(())
/// # }
/// ```
pub async fn convert_files<P: AsRef<Path>>(
    paths: &[P],
    config: &ConversionConfig,
) -> Result<ConversionOutput, DocuLatexError> {
    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        files.push(InputFile::from_path(path).await?);
    }
    convert_inputs(&files, config).await
}

/// Convert already-validated inputs using the configured provider.
pub async fn convert_inputs(
    files: &[InputFile],
    config: &ConversionConfig,
) -> Result<ConversionOutput, DocuLatexError> {
    let provider = resolve_provider(config)?;
    let backend = LlmBackend::new(
        provider,
        config.temperature,
        config.max_tokens,
        Duration::from_secs(config.api_timeout_secs),
    );
    convert_with_backend(&backend, files, config).await
}

/// The full pipeline over any backend.
pub async fn convert_with_backend<B: ConversionBackend>(
    backend: &B,
    files: &[InputFile],
    config: &ConversionConfig,
) -> Result<ConversionOutput, DocuLatexError> {
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_start(files.len());
    }

    let result = run_pipeline(backend, files, config).await;

    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(files.len(), result.is_ok());
    }
    result
}

async fn run_pipeline<B: ConversionBackend>(
    backend: &B,
    files: &[InputFile],
    config: &ConversionConfig,
) -> Result<ConversionOutput, DocuLatexError> {
    if files.is_empty() {
        return Err(DocuLatexError::InvalidConfig("no input files".to_string()));
    }
    let total_start = Instant::now();
    let file_name = files
        .iter()
        .map(|f| f.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    info!("Converting {} file(s): {}", files.len(), file_name);

    // ── Step 1: Rasterise ────────────────────────────────────────────────
    let render_start = Instant::now();
    let rasterizer = Rasterizer::new(config)?;
    let mut rasterized: Vec<RasterizedInput> = Vec::with_capacity(files.len());
    for file in files {
        let input = rasterizer.rasterize(file).await?;
        debug!("{}: {} page image(s)", input.file_name, input.pages.len());
        if let Some(ref cb) = config.progress_callback {
            cb.on_file_rasterized(&input.file_name, input.pages.len());
        }
        rasterized.push(input);
    }
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    // ── Step 2: Remote calls, one per file ───────────────────────────────
    let system_instruction = prompts::system_instruction(config.system_prompt.as_deref()).to_string();
    let requests: Vec<ConversionRequest> = rasterized
        .iter()
        .map(|input| ConversionRequest {
            inputs: input.upload_inputs.clone(),
            system_instruction: system_instruction.clone(),
            user_instruction: prompts::USER_INSTRUCTION.to_string(),
        })
        .collect();

    let policy = config.retry_policy();
    let llm_start = Instant::now();
    let replies = try_join_all(rasterized.iter().zip(&requests).map(|(input, request)| {
        request_conversion(
            backend,
            request,
            &policy,
            config.progress_callback.as_ref(),
            &input.file_name,
        )
    }))
    .await?;
    let llm_duration_ms = llm_start.elapsed().as_millis() as u64;

    // ── Step 3: Normalise and join ───────────────────────────────────────
    let mut usage = TokenUsage::default();
    let mut texts = Vec::with_capacity(replies.len());
    for (input, reply) in rasterized.iter().zip(replies) {
        let text = normalize(&reply.text);
        if let Some(ref cb) = config.progress_callback {
            cb.on_file_converted(&input.file_name, text.len());
        }
        usage += reply.usage;
        texts.push(text);
    }
    let text = texts.join("\n");

    let pages_sent = rasterized.iter().map(|r| r.pages.len()).sum();
    let pages_skipped = rasterized
        .iter()
        .map(|r| r.source_pages.saturating_sub(r.pages.len()))
        .sum();
    let pages = rasterized.into_iter().flat_map(|r| r.pages).collect();

    let mut output = ConversionOutput {
        file_name,
        text,
        usage,
        stats: ConversionStats {
            files: files.len(),
            pages_sent,
            pages_skipped,
            placeholders: 0,
            render_duration_ms,
            llm_duration_ms,
            total_duration_ms: total_start.elapsed().as_millis() as u64,
        },
        pages,
    };
    output.stats.placeholders = output.placeholder_count();

    info!(
        "Conversion complete: {} page(s), {} placeholder(s), {} in / {} out tokens, {}ms",
        output.stats.pages_sent,
        output.stats.placeholders,
        output.usage.prompt_tokens,
        output.usage.response_tokens,
        output.stats.total_duration_ms
    );
    Ok(output)
}

/// A conversion that went through the trial gate and was saved.
#[derive(Debug, Clone)]
pub struct RecordedConversion {
    pub output: ConversionOutput,
    /// `None` when the history write failed; the conversion still counts.
    pub history_id: Option<String>,
    pub usage_state: UsageState,
}

/// Check the trial gate, convert, then save to history and count the use.
pub async fn convert_and_record<B: ConversionBackend>(
    store: &LocalStore,
    backend: &B,
    files: &[InputFile],
    config: &ConversionConfig,
) -> Result<RecordedConversion, DocuLatexError> {
    store.license().check()?;

    let output = convert_with_backend(backend, files, config).await?;

    let history_id = match store.history().push(&output.file_name, &output.text) {
        Ok(entry) => Some(entry.id),
        Err(e) => {
            warn!("Conversion not saved to history: {}", e);
            None
        }
    };
    let usage_state = store.license().record_conversion()?;

    Ok(RecordedConversion {
        output,
        history_id,
        usage_state,
    })
}

/// Synchronous wrapper around [`convert_files`].
///
/// Creates a temporary tokio runtime internally.
pub fn convert_sync<P: AsRef<Path>>(
    paths: &[P],
    config: &ConversionConfig,
) -> Result<ConversionOutput, DocuLatexError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocuLatexError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(convert_files(paths, config))
}

/// Resolve the LLM provider.
///
/// 1. **Pre-built provider** (`config.provider`) is used as-is.
/// 2. **Gemini with a configured key** (`config.api_key`): the provider is
///    built directly with that key.
/// 3. Otherwise a provider is created by name (default `gemini`) via
///    [`ProviderFactory::create_llm_provider`], which reads its key from the
///    environment.
///
/// Gemini keys are format-checked first, so a missing or malformed key fails
/// fast with an auth error instead of a confusing provider message.
pub fn resolve_provider(config: &ConversionConfig) -> Result<Arc<dyn LLMProvider>, DocuLatexError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let name = config.provider_name.as_deref().unwrap_or(DEFAULT_PROVIDER);
    if name == DEFAULT_PROVIDER {
        let configured = config.api_key.as_deref().map(str::trim);
        let key = configured
            .map(str::to_string)
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .unwrap_or_default();
        if !validate_api_key(&key) {
            return Err(DocuLatexError::AuthError {
                detail: "missing or malformed Gemini API key".to_string(),
            });
        }
        if let Some(key) = configured {
            debug!("Creating gemini provider with configured key / {}", config.model_name());
            return Ok(Arc::new(
                GeminiProvider::new(key).with_model(config.model_name()),
            ));
        }
    }

    debug!("Creating provider {} / {}", name, config.model_name());
    ProviderFactory::create_llm_provider(name, config.model_name()).map_err(|e| {
        DocuLatexError::AuthError {
            detail: format!("provider '{name}' could not be created: {e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gemini_without_key_is_auth_error() {
        let config = ConversionConfig::builder()
            .api_key("not-a-gemini-key")
            .build()
            .unwrap();
        let err = resolve_provider(&config).err().unwrap();
        assert_eq!(err.tag(), "AUTH_ERROR");
    }

    #[test]
    fn configured_gemini_key_builds_provider_without_env() {
        let config = ConversionConfig::builder()
            .api_key("AIzaConfiguredKey123")
            .model("gemini-2.5-flash")
            .build()
            .unwrap();
        let provider = resolve_provider(&config).unwrap();
        assert_eq!(provider.model(), "gemini-2.5-flash");
    }

    #[tokio::test]
    async fn empty_input_list_is_rejected() {
        struct Never;
        impl ConversionBackend for Never {
            async fn generate(
                &self,
                _request: &ConversionRequest,
            ) -> Result<crate::pipeline::llm::ConversionReply, crate::pipeline::llm::RemoteFailure>
            {
                unreachable!()
            }
        }
        let err = convert_with_backend(&Never, &[], &ConversionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocuLatexError::InvalidConfig(_)));
    }
}
