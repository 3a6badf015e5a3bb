//! Completion client: one logical model request with retries, backoff, and
//! output validation.
//!
//! The client wraps a [`ModelProvider`] and turns a single `complete` call
//! into up to `max_retries + 1` attempts. Transport failures, timeouts, and
//! validation failures share one retry budget; exponential backoff applies
//! between attempts only. The client never raises until the budget is
//! exhausted, and then raises the most actionable error: the validation
//! error when the final failure was one, a generic completion error
//! otherwise.

pub mod provider;
pub mod scripted;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

pub use provider::ModelProvider;
pub use scripted::ScriptedProvider;

use crate::validator::{self, ExpectedShape, ValidationError};

/// Configuration for the completion client.
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// Backoff before the first retry; doubles per subsequent attempt.
    pub base_backoff: Duration,
    /// Wall time limit per model invocation. A timeout counts as a failed
    /// attempt under the normal retry policy.
    pub request_timeout: Duration,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(1),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Envelope describing one logical completion request.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub request_id: Uuid,
    pub prompt_name: String,
    /// SHA-256 of the prompt text, hex-encoded. Stable across retries, used
    /// for tracing and deduplication.
    pub prompt_hash: String,
    pub raw_text: String,
    pub payload: Option<Value>,
    pub success: bool,
    /// Retries consumed before the outcome (0 = first attempt succeeded).
    pub retries: u32,
    pub latency_ms: u64,
    pub model_id: String,
}

/// Terminal failure of one logical completion request.
#[derive(Debug, Error)]
pub enum CompletionError {
    /// The retry budget ran out and the last attempt failed validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The retry budget ran out on a transport failure or timeout.
    #[error("model call failed after {attempts} attempts: {reason}")]
    Exhausted { attempts: u32, reason: String },
}

/// Stable hex-encoded SHA-256 of a prompt.
pub fn prompt_hash(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

enum AttemptFailure {
    Transport(String),
    Validation(ValidationError),
}

/// Issues logical model requests against a [`ModelProvider`].
#[derive(Clone)]
pub struct CompletionClient {
    provider: Arc<dyn ModelProvider>,
    config: CompletionConfig,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn ModelProvider>, config: CompletionConfig) -> Self {
        Self { provider, config }
    }

    /// Perform one logical completion: up to `max_retries + 1` attempts,
    /// each validated against `shape`.
    pub async fn complete(
        &self,
        prompt_name: &str,
        prompt_text: &str,
        shape: &ExpectedShape,
        max_retries: u32,
    ) -> Result<CompletionResponse, CompletionError> {
        let request_id = Uuid::new_v4();
        let hash = prompt_hash(prompt_text);
        let start = Instant::now();
        let mut last_failure: Option<AttemptFailure> = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.base_backoff * 2u32.pow(attempt - 1)).await;
            }

            let raw = match tokio::time::timeout(
                self.config.request_timeout,
                self.provider.invoke(prompt_name, prompt_text),
            )
            .await
            {
                Err(_) => {
                    tracing::warn!(
                        %request_id,
                        prompt_name,
                        attempt,
                        timeout_ms = self.config.request_timeout.as_millis() as u64,
                        "model invocation timed out"
                    );
                    last_failure = Some(AttemptFailure::Transport(format!(
                        "timed out after {:?}",
                        self.config.request_timeout
                    )));
                    continue;
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        %request_id,
                        prompt_name,
                        attempt,
                        error = %e,
                        "model invocation failed"
                    );
                    last_failure = Some(AttemptFailure::Transport(format!("{e:#}")));
                    continue;
                }
                Ok(Ok(raw)) => raw,
            };

            match validator::validate(&raw, shape) {
                Ok(payload) => {
                    let response = CompletionResponse {
                        request_id,
                        prompt_name: prompt_name.to_owned(),
                        prompt_hash: hash,
                        raw_text: raw,
                        payload: Some(payload),
                        success: true,
                        retries: attempt,
                        latency_ms: start.elapsed().as_millis() as u64,
                        model_id: self.provider.model_id().to_owned(),
                    };
                    tracing::debug!(
                        %request_id,
                        prompt_name,
                        prompt_hash = %response.prompt_hash,
                        retries = response.retries,
                        latency_ms = response.latency_ms,
                        "completion succeeded"
                    );
                    return Ok(response);
                }
                Err(e) => {
                    tracing::warn!(
                        %request_id,
                        prompt_name,
                        attempt,
                        error = %e,
                        "model output failed validation"
                    );
                    last_failure = Some(AttemptFailure::Validation(e));
                }
            }
        }

        // Budget exhausted. Record the failed envelope, then raise the most
        // actionable error.
        tracing::warn!(
            %request_id,
            prompt_name,
            prompt_hash = %hash,
            attempts = max_retries + 1,
            latency_ms = start.elapsed().as_millis() as u64,
            model_id = self.provider.model_id(),
            "completion exhausted its retry budget"
        );

        match last_failure {
            Some(AttemptFailure::Validation(e)) => Err(CompletionError::Validation(e)),
            Some(AttemptFailure::Transport(reason)) => Err(CompletionError::Exhausted {
                attempts: max_retries + 1,
                reason,
            }),
            // Unreachable: the loop always runs at least once.
            None => Err(CompletionError::Exhausted {
                attempts: 0,
                reason: "no attempts were made".to_owned(),
            }),
        }
    }
}
