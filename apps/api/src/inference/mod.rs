//! Local Inference Engine — in-process analysis of a (job posting, essay)
//! pair with an adapter-fine-tuned causal LM.
//!
//! ARCHITECTURAL RULE: the single compute device runs one generation pass
//! at a time. `LocalAnalysisEngine` serializes callers on a single-slot
//! mutex around the session; expected latency under load grows linearly
//! with queue depth × generation length. No batching.
//!
//! `AppState` holds an `Arc<dyn AnalysisEngine>` so tests can substitute
//! doubles without touching handler or pipeline code.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

pub mod prompts;
pub mod session;

pub use session::ModelSession;

use prompts::{build_analysis_user_message, format_chat_prompt, ANALYSIS_SYSTEM};

/// Ceiling on newly generated tokens for one analysis.
const MAX_NEW_TOKENS: usize = 1024;
/// Low temperature on purpose: it suppresses creative deviation so the
/// adapter reliably emits its trained JSON shape rather than free prose.
const TEMPERATURE: f64 = 0.1;
const TOP_P: f64 = 0.9;
const SAMPLING_SEED: u64 = 299792458;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    #[error("Model error: {0}")]
    Model(#[from] candle_core::Error),

    #[error("Generation exceeded the {secs}s wall-clock bound")]
    Timeout { secs: u64 },

    #[error("Generation worker failed: {0}")]
    Worker(String),
}

/// Sampling parameters for one generation pass.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub max_new_tokens: usize,
    pub temperature: f64,
    pub top_p: f64,
    pub seed: u64,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_new_tokens: MAX_NEW_TOKENS,
            temperature: TEMPERATURE,
            top_p: TOP_P,
            seed: SAMPLING_SEED,
        }
    }
}

/// Stage 1 of the feedback pipeline. Returns the model's raw completion —
/// expected to be the JSON critique, but not parsed or validated here
/// (the orchestrator owns that step).
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    async fn analyze(
        &self,
        job_description: &str,
        essay_text: &str,
    ) -> Result<String, InferenceError>;
}

/// Production engine backed by the in-process candle session.
pub struct LocalAnalysisEngine {
    session: Arc<Mutex<ModelSession>>,
    params: GenerationParams,
    timeout: Duration,
}

impl LocalAnalysisEngine {
    pub fn new(session: ModelSession, timeout: Duration) -> Self {
        Self {
            session: Arc::new(Mutex::new(session)),
            params: GenerationParams::default(),
            timeout,
        }
    }
}

#[async_trait]
impl AnalysisEngine for LocalAnalysisEngine {
    async fn analyze(
        &self,
        job_description: &str,
        essay_text: &str,
    ) -> Result<String, InferenceError> {
        let user = build_analysis_user_message(job_description, essay_text);
        let prompt = format_chat_prompt(ANALYSIS_SYSTEM, &user);
        debug!("Analysis prompt built ({} chars)", prompt.len());

        let session = Arc::clone(&self.session);
        let params = self.params.clone();
        let task = tokio::task::spawn_blocking(move || {
            // Recover from a poisoned lock: the session holds no partial
            // request state, only weights and a KV cache that the next
            // generate() clears.
            let mut session = session.lock().unwrap_or_else(|p| p.into_inner());
            session.generate(&prompt, &params)
        });

        // Once generation has started it runs to completion on its thread;
        // the timeout only releases this caller.
        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(InferenceError::Worker(join_err.to_string())),
            Err(_) => Err(InferenceError::Timeout {
                secs: self.timeout.as_secs(),
            }),
        }
    }
}
