// Prompt constants for the remote rewrite call.

/// System prompt for the rewrite model — plain prose output, no JSON.
pub const REWRITE_SYSTEM: &str = "You are an expert career coach who polishes \
    self-introduction essays for job applications. \
    You output ONLY the rewritten essay text. \
    Do NOT include greetings, preambles, headings, or commentary.";

/// Rewrite prompt template. Replace `{analysis}` and `{essay}` before sending.
pub const REWRITE_PROMPT_TEMPLATE: &str = r#"Rewrite the candidate's self-introduction essay below, guided by the structured analysis of how it matches the target job posting.

STRUCTURED ANALYSIS (verbatim from the analysis stage):
{analysis}

ORIGINAL ESSAY:
{essay}

Rules for the rewrite:
1. Emphasize the listed strengths — make them concrete and prominent.
2. Naturally compensate for the listed weaknesses and missing keywords; weave them in, do NOT bolt on a keyword list.
3. Preserve the approximate length of the original essay.
4. Keep the candidate's first-person voice and do not invent experience they never claimed.
5. Output ONLY the rewritten essay — no greeting, no preamble, no closing note."#;

/// Fixed degraded-mode message returned when no rewrite credential is
/// configured for the process.
pub const UNAVAILABLE_MESSAGE: &str = "Essay rewriting is currently unavailable: \
    no rewrite credential is configured. Your analysis is still complete.";

/// Builds the rewrite prompt by filling the template.
/// Pure: byte-identical output for identical inputs.
pub fn build_rewrite_prompt(analysis_text: &str, original_essay: &str) -> String {
    REWRITE_PROMPT_TEMPLATE
        .replace("{analysis}", analysis_text)
        .replace("{essay}", original_essay)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_prompt_embeds_analysis_and_essay_verbatim() {
        let prompt = build_rewrite_prompt(r#"{"score": 40}"#, "I built a web app.");
        assert!(prompt.contains(r#"{"score": 40}"#));
        assert!(prompt.contains("ORIGINAL ESSAY:\nI built a web app."));
    }

    #[test]
    fn test_rewrite_prompt_has_no_unfilled_placeholders() {
        let prompt = build_rewrite_prompt("analysis", "essay");
        assert!(!prompt.contains("{analysis}"));
        assert!(!prompt.contains("{essay}"));
    }
}
