//! Axum route handlers for the Feedback API.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::feedback::analysis::AnalysisPayload;
use crate::feedback::pipeline::produce_feedback;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub job_description: String,
    pub essay_text: String,
}

#[derive(Debug, Serialize)]
pub struct FeedbackResponse {
    /// Raw stage-1 output, verbatim.
    pub analysis: String,
    /// Typed view of the analysis (`kind: structured` or `kind: raw`).
    pub analysis_structured: AnalysisPayload,
    /// Rewritten essay, or the display text of a degraded outcome.
    pub rewrite: String,
    /// "success" | "unavailable" | "failed" — lets callers tell a real
    /// rewrite from degraded text without string-matching.
    pub rewrite_status: String,
    pub message: String,
}

/// POST /api/v1/feedback
///
/// Full two-stage pipeline: local analysis → remote rewrite.
/// Blocks until generation completes; there is no streaming.
pub async fn handle_feedback(
    State(state): State<AppState>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<FeedbackResponse>, AppError> {
    let result = produce_feedback(
        state.engine.as_ref(),
        state.rewriter.as_ref(),
        &request.job_description,
        &request.essay_text,
    )
    .await?;

    Ok(Json(FeedbackResponse {
        analysis: result.analysis,
        analysis_structured: result.structured,
        rewrite: result.rewrite.display_text(),
        rewrite_status: result.rewrite.status().to_string(),
        message: result.message.to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_request_deserializes() {
        let json = serde_json::json!({
            "job_description": "Backend engineer, needs Go",
            "essay_text": "I built a web app using Python."
        });
        let request: FeedbackRequest = serde_json::from_value(json).unwrap();
        assert!(!request.job_description.is_empty());
        assert!(!request.essay_text.is_empty());
    }

    #[test]
    fn test_feedback_request_rejects_missing_fields() {
        let json = serde_json::json!({ "essay_text": "only one field" });
        let result: Result<FeedbackRequest, _> = serde_json::from_value(json);
        assert!(result.is_err(), "job_description is required");
    }

    #[test]
    fn test_feedback_response_shape() {
        let response = FeedbackResponse {
            analysis: r#"{"score": 40}"#.to_string(),
            analysis_structured: AnalysisPayload::Raw {
                text: r#"{"score": 40}"#.to_string(),
            },
            rewrite: "Revised essay text...".to_string(),
            rewrite_status: "success".to_string(),
            message: "done".to_string(),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["rewrite_status"], "success");
        assert_eq!(json["analysis_structured"]["kind"], "raw");
    }
}
