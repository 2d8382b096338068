//! Typed view of the analysis stage output.
//!
//! The local model is trusted to emit the trained JSON shape, but that
//! trust is verified here: the raw text is parsed once and malformed
//! output is wrapped in a typed `Raw` variant instead of being forwarded
//! unchecked. The raw text itself is always passed through verbatim.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// The critique schema the adapter was fine-tuned to emit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredAnalysis {
    /// 0 – 100 match score between essay and job posting.
    pub score: u32,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub missing_keywords: Vec<String>,
    pub overall_advice: String,
}

/// Result of the parse-and-validate step over the model's raw output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalysisPayload {
    Structured(StructuredAnalysis),
    /// The model's output did not parse as the expected schema. Carries
    /// the text so the variant is self-contained.
    Raw { text: String },
}

impl AnalysisPayload {
    /// Parses the model's raw completion, stripping markdown code fences
    /// first. Never fails: malformed or out-of-range output becomes `Raw`.
    pub fn parse(raw: &str) -> Self {
        let candidate = strip_json_fences(raw);
        match serde_json::from_str::<StructuredAnalysis>(candidate) {
            Ok(analysis) if analysis.score <= 100 => AnalysisPayload::Structured(analysis),
            Ok(analysis) => {
                warn!(
                    "Analysis score {} is outside 0-100; treating output as unvalidated",
                    analysis.score
                );
                AnalysisPayload::Raw {
                    text: raw.to_string(),
                }
            }
            Err(e) => {
                warn!("Analysis output did not match the expected schema: {e}");
                AnalysisPayload::Raw {
                    text: raw.to_string(),
                }
            }
        }
    }

    pub fn is_structured(&self) -> bool {
        matches!(self, AnalysisPayload::Structured(_))
    }
}

/// Strips ```json ... ``` or ``` ... ``` code fences from model output.
fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    if let Some(stripped) = text.strip_prefix("```json") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else if let Some(stripped) = text.strip_prefix("```") {
        stripped
            .trim_start()
            .strip_suffix("```")
            .map(|s| s.trim())
            .unwrap_or(stripped.trim_start())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_ANALYSIS: &str = r#"{"score": 40, "strengths": ["built a project"], "weaknesses": ["no distributed systems experience"], "missing_keywords": ["Go"], "overall_advice": "Learn Go"}"#;

    #[test]
    fn test_valid_json_parses_to_structured() {
        let payload = AnalysisPayload::parse(VALID_ANALYSIS);
        match payload {
            AnalysisPayload::Structured(analysis) => {
                assert_eq!(analysis.score, 40);
                assert_eq!(analysis.strengths, vec!["built a project"]);
                assert_eq!(analysis.missing_keywords, vec!["Go"]);
                assert_eq!(analysis.overall_advice, "Learn Go");
            }
            AnalysisPayload::Raw { .. } => panic!("valid JSON must parse as Structured"),
        }
    }

    #[test]
    fn test_fenced_json_parses_to_structured() {
        let fenced = format!("```json\n{VALID_ANALYSIS}\n```");
        assert!(AnalysisPayload::parse(&fenced).is_structured());
    }

    #[test]
    fn test_prose_falls_back_to_raw_with_text_preserved() {
        let raw = "The essay is decent but lacks Go experience.";
        match AnalysisPayload::parse(raw) {
            AnalysisPayload::Raw { text } => assert_eq!(text, raw),
            AnalysisPayload::Structured(_) => panic!("prose must not parse as Structured"),
        }
    }

    #[test]
    fn test_truncated_json_falls_back_to_raw() {
        // A generation that hit the token ceiling mid-object.
        let truncated = r#"{"score": 40, "strengths": ["built a"#;
        assert!(!AnalysisPayload::parse(truncated).is_structured());
    }

    #[test]
    fn test_out_of_range_score_falls_back_to_raw() {
        let raw = r#"{"score": 4000, "strengths": [], "weaknesses": [], "missing_keywords": [], "overall_advice": "x"}"#;
        match AnalysisPayload::parse(raw) {
            AnalysisPayload::Raw { text } => assert_eq!(text, raw),
            AnalysisPayload::Structured(_) => {
                panic!("a score outside 0-100 must not pass validation")
            }
        }
    }

    #[test]
    fn test_boundary_score_100_is_structured() {
        let raw = r#"{"score": 100, "strengths": [], "weaknesses": [], "missing_keywords": [], "overall_advice": "x"}"#;
        assert!(AnalysisPayload::parse(raw).is_structured());
    }

    #[test]
    fn test_strip_json_fences_with_json_tag() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_strip_json_fences_no_fences() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_json_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn test_structured_payload_serializes_with_kind_tag() {
        let payload = AnalysisPayload::parse(VALID_ANALYSIS);
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "structured");
        assert_eq!(json["score"], 40);
    }
}
