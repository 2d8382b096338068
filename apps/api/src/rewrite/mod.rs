//! Remote Rewrite Client — the single point of entry for all external
//! generative-model calls in this service.
//!
//! ARCHITECTURAL RULE: no other module may call the Anthropic API directly.
//!
//! Unlike the local engine, rewrite calls are stateless network requests
//! and may run concurrently across requests; the only shared resource is
//! the credential. A process started without a credential keeps the client
//! permanently disabled — that is a steady degraded mode, not an error.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub mod prompts;

use prompts::{build_rewrite_prompt, REWRITE_SYSTEM, UNAVAILABLE_MESSAGE};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The model used for rewrites. Intentionally hardcoded to prevent drift.
pub const MODEL: &str = "claude-sonnet-4-5";
const MAX_TOKENS: u32 = 4096;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited after {retries} retries")]
    RateLimited { retries: u32 },

    #[error("Rewrite model returned empty content")]
    EmptyContent,
}

/// Tagged outcome of one rewrite attempt. Callers can tell "succeeded"
/// from "degraded" programmatically; `display_text` renders the degraded
/// variants as the display-friendly strings the UI shows in place of a
/// rewrite.
#[derive(Debug, Clone, PartialEq)]
pub enum RewriteOutcome {
    Success(String),
    /// No credential configured — fixed for the process lifetime.
    Unavailable,
    /// The remote call itself faulted (network, quota, service error).
    Failed(String),
}

impl RewriteOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            RewriteOutcome::Success(_) => "success",
            RewriteOutcome::Unavailable => "unavailable",
            RewriteOutcome::Failed(_) => "failed",
        }
    }

    pub fn display_text(&self) -> String {
        match self {
            RewriteOutcome::Success(text) => text.clone(),
            RewriteOutcome::Unavailable => UNAVAILABLE_MESSAGE.to_string(),
            RewriteOutcome::Failed(reason) => {
                format!("Essay rewriting failed this time: {reason}. Your analysis is still complete.")
            }
        }
    }
}

/// Stage 2 of the feedback pipeline. Never returns `Err`: failures are
/// reported as tagged outcomes so the caller still receives the analysis.
#[async_trait]
pub trait Rewriter: Send + Sync {
    async fn rewrite(&self, analysis_text: &str, original_essay: &str) -> RewriteOutcome;
}

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<AnthropicMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    content: Vec<ContentBlock>,
    usage: Usage,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

impl ApiResponse {
    fn text(&self) -> Option<&str> {
        self.content
            .iter()
            .find(|b| b.block_type == "text")
            .and_then(|b| b.text.as_deref())
    }
}

#[derive(Debug, Deserialize)]
struct AnthropicError {
    error: AnthropicErrorBody,
}

#[derive(Debug, Deserialize)]
struct AnthropicErrorBody {
    message: String,
}

struct Credential {
    http: Client,
    api_key: String,
}

/// Remote rewrite client backed by the Anthropic Messages API.
pub struct RewriteClient {
    credential: Option<Credential>,
}

impl RewriteClient {
    /// `None` ⇒ the client is disabled for the process lifetime and every
    /// call returns `RewriteOutcome::Unavailable` without touching the
    /// network.
    pub fn new(api_key: Option<String>) -> Self {
        let credential = api_key.map(|api_key| Credential {
            http: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .expect("Failed to build HTTP client"),
            api_key,
        });
        Self { credential }
    }

    pub fn is_enabled(&self) -> bool {
        self.credential.is_some()
    }

    /// Raw call with retry on 429 and 5xx, exponential backoff.
    async fn call(&self, credential: &Credential, prompt: &str) -> Result<String, RewriteError> {
        let request_body = AnthropicRequest {
            model: MODEL,
            max_tokens: MAX_TOKENS,
            system: REWRITE_SYSTEM,
            messages: vec![AnthropicMessage {
                role: "user",
                content: prompt,
            }],
        };

        let mut last_error: Option<RewriteError> = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                // Exponential backoff: 1s, 2s, 4s
                let delay = std::time::Duration::from_millis(1000 * (1 << (attempt - 1)));
                warn!(
                    "Rewrite call attempt {} failed, retrying after {}ms...",
                    attempt,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }

            let response = credential
                .http
                .post(ANTHROPIC_API_URL)
                .header("x-api-key", &credential.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .header("content-type", "application/json")
                .json(&request_body)
                .send()
                .await;

            let response = match response {
                Ok(r) => r,
                Err(e) => {
                    last_error = Some(RewriteError::Http(e));
                    continue;
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                warn!("Rewrite API returned {}: {}", status, body);
                last_error = Some(RewriteError::Api {
                    status: status.as_u16(),
                    message: body,
                });
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                let message = serde_json::from_str::<AnthropicError>(&body)
                    .map(|e| e.error.message)
                    .unwrap_or(body);
                return Err(RewriteError::Api {
                    status: status.as_u16(),
                    message,
                });
            }

            let api_response: ApiResponse = response.json().await?;

            debug!(
                "Rewrite call succeeded: input_tokens={}, output_tokens={}",
                api_response.usage.input_tokens, api_response.usage.output_tokens
            );

            let text = api_response.text().ok_or(RewriteError::EmptyContent)?;
            return Ok(text.trim().to_string());
        }

        Err(last_error.unwrap_or(RewriteError::RateLimited {
            retries: MAX_RETRIES,
        }))
    }
}

#[async_trait]
impl Rewriter for RewriteClient {
    async fn rewrite(&self, analysis_text: &str, original_essay: &str) -> RewriteOutcome {
        let Some(credential) = &self.credential else {
            return RewriteOutcome::Unavailable;
        };

        let prompt = build_rewrite_prompt(analysis_text, original_essay);
        match self.call(credential, &prompt).await {
            Ok(text) => RewriteOutcome::Success(text),
            Err(e) => {
                warn!("Rewrite degraded to failure message: {e}");
                RewriteOutcome::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_client_always_returns_unavailable() {
        let client = RewriteClient::new(None);
        assert!(!client.is_enabled());

        // No network call is made: the credential gate short-circuits
        // before any request is built.
        for _ in 0..3 {
            let outcome = client.rewrite(r#"{"score": 40}"#, "essay").await;
            assert_eq!(outcome, RewriteOutcome::Unavailable);
            assert_eq!(outcome.display_text(), UNAVAILABLE_MESSAGE);
        }
    }

    #[test]
    fn test_blank_key_is_treated_as_enabled_only_if_provided() {
        // Config filters blank keys to None before construction; the
        // client itself only distinguishes Some vs None.
        assert!(RewriteClient::new(Some("sk-test".to_string())).is_enabled());
        assert!(!RewriteClient::new(None).is_enabled());
    }

    #[test]
    fn test_outcome_status_tags() {
        assert_eq!(RewriteOutcome::Success("x".into()).status(), "success");
        assert_eq!(RewriteOutcome::Unavailable.status(), "unavailable");
        assert_eq!(RewriteOutcome::Failed("boom".into()).status(), "failed");
    }

    #[test]
    fn test_failed_display_text_embeds_reason() {
        let outcome = RewriteOutcome::Failed("quota exceeded".into());
        assert!(outcome.display_text().contains("quota exceeded"));
    }
}
