// Prompt constants and formatting for the local analysis model.
// Each service that needs LLM calls defines its own prompts.rs alongside it.

/// System instruction the adapter was fine-tuned against — enforces
/// JSON-only output with the exact feedback schema.
pub const ANALYSIS_SYSTEM: &str = "You are a professional recruiting advisor for IT roles. \
    Compare the job posting against the candidate's self-introduction essay and \
    provide feedback ONLY as a JSON object with this exact schema: \
    {\"score\": <integer 0-100>, \"strengths\": [<string>], \"weaknesses\": [<string>], \
    \"missing_keywords\": [<string>], \"overall_advice\": <string>}. \
    Do NOT include any text outside the JSON object.";

/// Builds the user turn embedding both inputs under labeled headers.
/// Pure: byte-identical output for identical inputs.
pub fn build_analysis_user_message(job_description: &str, essay_text: &str) -> String {
    format!("### Job Posting:\n{job_description}\n\n### Self-Introduction Essay:\n{essay_text}")
}

/// Encodes a system + user conversation in the Qwen2 ChatML convention,
/// ending with the assistant generation-start marker.
///
/// This MUST match the chat template the adapter was fine-tuned with.
/// A mismatch does not error — it silently degrades output quality and
/// breaks the JSON shape the adapter learned to emit.
pub fn format_chat_prompt(system: &str, user: &str) -> String {
    format!(
        "<|im_start|>system\n{system}<|im_end|>\n\
         <|im_start|>user\n{user}<|im_end|>\n\
         <|im_start|>assistant\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_message_embeds_both_inputs_under_headers() {
        let msg = build_analysis_user_message("Backend engineer, Go required", "I built a web app.");
        assert!(msg.starts_with("### Job Posting:\nBackend engineer, Go required"));
        assert!(msg.contains("### Self-Introduction Essay:\nI built a web app."));
    }

    #[test]
    fn test_chat_prompt_ends_with_generation_start_marker() {
        let prompt = format_chat_prompt(ANALYSIS_SYSTEM, "hello");
        assert!(prompt.ends_with("<|im_start|>assistant\n"));
        assert!(prompt.starts_with("<|im_start|>system\n"));
    }

    /// Prompt construction is pure: repeated calls with fixed inputs must
    /// produce byte-identical prompts.
    #[test]
    fn test_chat_prompt_is_deterministic() {
        let user = build_analysis_user_message("jd", "essay");
        let a = format_chat_prompt(ANALYSIS_SYSTEM, &user);
        let b = format_chat_prompt(ANALYSIS_SYSTEM, &build_analysis_user_message("jd", "essay"));
        assert_eq!(a, b);
    }
}
