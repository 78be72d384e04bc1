//! Remote conversion call: one request per input file, bounded retry.
//!
//! This module knows nothing about prompts (see [`crate::prompts`]) or about
//! what the reply means (see [`crate::pipeline::normalize`]). It sends the
//! page images and returns raw text, or a classified failure.
//!
//! ## Retry Strategy
//!
//! Only transient server failures (5xx, "overloaded", timeouts) are retried.
//! A bad key or an exhausted quota will not fix itself in four seconds, so
//! those fail immediately. The schedule is a pure function,
//! [`retry_decision`], so it can be tested without sleeping: with the default
//! 2000 ms base and 3 attempts the waits are 2 s → 4 s.

use crate::error::DocuLatexError;
use crate::output::TokenUsage;
use crate::pipeline::encode::UploadInput;
use crate::progress::ProgressCallback;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, warn};

/// Everything the model sees for one input file.
#[derive(Debug, Clone)]
pub struct ConversionRequest {
    /// Page images in page order.
    pub inputs: Vec<UploadInput>,
    pub system_instruction: String,
    pub user_instruction: String,
}

/// Raw model reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReply {
    pub text: String,
    pub usage: TokenUsage,
}

/// A failed remote call, before classification.
#[derive(Debug, Clone)]
pub struct RemoteFailure {
    pub message: String,
}

impl RemoteFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn kind(&self) -> FailureKind {
        classify_failure(&self.message)
    }

    /// Final, user-facing error after `attempts` tries.
    pub fn into_error(self, attempts: u32) -> DocuLatexError {
        let detail = self.message;
        match classify_failure(&detail) {
            FailureKind::Auth => DocuLatexError::AuthError { detail },
            FailureKind::Quota => DocuLatexError::QuotaError { detail },
            FailureKind::Server => DocuLatexError::ServerError { attempts, detail },
            FailureKind::Safety => DocuLatexError::SafetyError { detail },
            FailureKind::Network => DocuLatexError::NetworkError { detail },
            FailureKind::Api => DocuLatexError::ApiError { detail },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Auth,
    Quota,
    Server,
    Safety,
    Network,
    Api,
}

/// Map a provider error message onto a failure kind.
///
/// Providers only give us strings, so this is substring matching, checked in
/// a fixed order (auth before quota before safety before server).
pub fn classify_failure(message: &str) -> FailureKind {
    let m = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| m.contains(n));

    if has(&["api key", "api_key", "apikey", "401", "403", "unauthenticated", "permission denied"]) {
        FailureKind::Auth
    } else if has(&["429", "quota", "rate limit", "resource_exhausted", "resource exhausted"]) {
        FailureKind::Quota
    } else if has(&["safety", "content_filter", "content filter", "prohibited_content", "blocked"]) {
        FailureKind::Safety
    } else if has(&["500", "503", "internal error", "overloaded", "unavailable", "timed out"]) {
        FailureKind::Server
    } else if has(&["failed to fetch", "error sending request", "connection", "dns", "network"]) {
        FailureKind::Network
    } else {
        FailureKind::Api
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub retry: bool,
    pub delay_ms: u64,
}

/// Whether to try again after attempt number `attempt` (1-based) failed.
pub fn retry_decision(attempt: u32, kind: FailureKind, policy: &RetryPolicy) -> RetryDecision {
    let attempt = attempt.max(1);
    if kind != FailureKind::Server || attempt >= policy.max_attempts {
        return RetryDecision {
            retry: false,
            delay_ms: 0,
        };
    }
    let factor = 1u64 << (attempt - 1).min(16);
    RetryDecision {
        retry: true,
        delay_ms: policy.backoff_ms.saturating_mul(factor),
    }
}

// ── Backend seam ─────────────────────────────────────────────────────────────

/// The remote conversion call.
pub trait ConversionBackend: Send + Sync {
    fn generate(
        &self,
        request: &ConversionRequest,
    ) -> impl Future<Output = Result<ConversionReply, RemoteFailure>> + Send;
}

/// [`ConversionBackend`] over any `edgequake-llm` provider.
pub struct LlmBackend {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Duration,
}

impl LlmBackend {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        temperature: f32,
        max_tokens: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(temperature),
                max_tokens: Some(max_tokens),
                ..Default::default()
            },
            timeout,
        }
    }
}

impl ConversionBackend for LlmBackend {
    /// ## Message Layout
    ///
    /// 1. **System message**: the fixed conversion instruction
    /// 2. **User message**: the user instruction plus every page image
    async fn generate(&self, request: &ConversionRequest) -> Result<ConversionReply, RemoteFailure> {
        let images = request
            .inputs
            .iter()
            .map(UploadInput::to_image_data)
            .collect::<Vec<_>>();
        let messages = vec![
            ChatMessage::system(request.system_instruction.as_str()),
            ChatMessage::user_with_images(request.user_instruction.as_str(), images),
        ];

        let response = tokio::time::timeout(self.timeout, self.provider.chat(&messages, Some(&self.options)))
            .await
            .map_err(|_| {
                RemoteFailure::new(format!("request timed out after {}s", self.timeout.as_secs()))
            })?
            .map_err(|e| RemoteFailure::new(e.to_string()))?;

        if response.content.trim().is_empty() {
            return Err(RemoteFailure::new("model returned an empty response"));
        }

        Ok(ConversionReply {
            text: response.content,
            usage: TokenUsage {
                prompt_tokens: response.prompt_tokens as u64,
                response_tokens: response.completion_tokens as u64,
            },
        })
    }
}

/// Run one request with retry.
///
/// `label` names the file in logs and progress events.
pub async fn request_conversion<B: ConversionBackend>(
    backend: &B,
    request: &ConversionRequest,
    policy: &RetryPolicy,
    progress: Option<&ProgressCallback>,
    label: &str,
) -> Result<ConversionReply, DocuLatexError> {
    let start = Instant::now();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match backend.generate(request).await {
            Ok(reply) => {
                debug!(
                    "{}: {} input tokens, {} output tokens, {:?}, attempt {}",
                    label,
                    reply.usage.prompt_tokens,
                    reply.usage.response_tokens,
                    start.elapsed(),
                    attempt
                );
                return Ok(reply);
            }
            Err(failure) => {
                let kind = failure.kind();
                let decision = retry_decision(attempt, kind, policy);
                if !decision.retry {
                    warn!("{}: attempt {} failed ({:?}), giving up: {}", label, attempt, kind, failure.message);
                    return Err(failure.into_error(attempt));
                }

                warn!(
                    "{}: attempt {}/{} failed ({:?}), retry after {}ms: {}",
                    label, attempt, policy.max_attempts, kind, decision.delay_ms, failure.message
                );
                if let Some(cb) = progress {
                    cb.on_retry(label, attempt, policy.max_attempts, &failure.message);
                }
                sleep(Duration::from_millis(decision.delay_ms)).await;
            }
        }
    }
}
