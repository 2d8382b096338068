//! Feedback pipeline — the two-stage orchestration at the heart of the
//! service.
//!
//! Flow: validate inputs → local analysis (stage 1) → parse-and-validate →
//! remote rewrite (stage 2) → assemble result.
//!
//! The stages are sequential and data-dependent: stage 2 consumes stage
//! 1's raw output, so there is no fan-out. A stage-1 fault is fatal to the
//! whole request and stage 2 is never reached; a stage-2 fault is never
//! fatal — it degrades to a tagged outcome so the caller still receives
//! the analysis.

use tracing::info;

use crate::errors::AppError;
use crate::feedback::analysis::AnalysisPayload;
use crate::inference::AnalysisEngine;
use crate::rewrite::{RewriteOutcome, Rewriter};

/// Fixed confirmation string attached to every completed feedback run.
pub const COMPLETION_MESSAGE: &str =
    "Your feedback is ready — best of luck with your application!";

/// Assembled output of one pipeline run.
#[derive(Debug)]
pub struct FeedbackResult {
    /// Stage-1 output, verbatim.
    pub analysis: String,
    /// Typed view of the same text (structured or raw fallback).
    pub structured: AnalysisPayload,
    pub rewrite: RewriteOutcome,
    pub message: &'static str,
}

/// Runs the full feedback pipeline.
///
/// Input validation happens here, before either inference component is
/// touched — an empty job posting or essay never costs a generation pass.
pub async fn produce_feedback(
    engine: &dyn AnalysisEngine,
    rewriter: &dyn Rewriter,
    job_description: &str,
    essay_text: &str,
) -> Result<FeedbackResult, AppError> {
    if job_description.trim().is_empty() {
        return Err(AppError::Validation(
            "job_description cannot be empty".to_string(),
        ));
    }
    if essay_text.trim().is_empty() {
        return Err(AppError::Validation(
            "essay_text cannot be empty".to_string(),
        ));
    }

    // Stage 1: local analysis. Fatal on fault — no partial pipeline.
    info!(
        job_description = %truncate(job_description, 30),
        essay = %truncate(essay_text, 30),
        "Running analysis stage"
    );
    let analysis = engine
        .analyze(job_description, essay_text)
        .await
        .map_err(|e| AppError::Analysis(e.to_string()))?;

    let structured = AnalysisPayload::parse(&analysis);
    info!(
        structured = structured.is_structured(),
        chars = analysis.len(),
        "Analysis stage complete"
    );

    // Stage 2: remote rewrite. Degrades, never aborts the request.
    let rewrite = rewriter.rewrite(&analysis, essay_text).await;
    info!(status = rewrite.status(), "Rewrite stage complete");

    Ok(FeedbackResult {
        analysis,
        structured,
        rewrite,
        message: COMPLETION_MESSAGE,
    })
}

/// Truncates a log field so whole essays never land in the logs.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(max_chars).collect();
        format!("{prefix}...")
    }
}
