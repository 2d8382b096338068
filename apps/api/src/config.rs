use anyhow::{bail, Context, Result};
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
/// Startup fails with an error if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    /// HF Hub repo id or local directory holding the base model.
    pub model_id: String,
    /// Directory holding the fine-tuned LoRA adapter (adapter_config.json
    /// + adapter_model.safetensors).
    pub adapter_path: PathBuf,
    /// Absent key ⇒ the rewrite client runs in permanent degraded mode.
    pub anthropic_api_key: Option<String>,
    /// Wall-clock bound on one local generation pass, in seconds.
    pub inference_timeout_secs: u64,
    pub port: u16,
    pub rust_log: String,
}

/// Base model the adapter was fine-tuned against. Overridable via MODEL_ID,
/// but the adapter's chat template must match whatever is loaded.
pub const DEFAULT_MODEL_ID: &str = "spow12/Ko-Qwen2-7B-Instruct";

const DEFAULT_INFERENCE_TIMEOUT_SECS: u64 = 300;

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            model_id: std::env::var("MODEL_ID").unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string()),
            adapter_path: PathBuf::from(require_env("ADAPTER_PATH")?),
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            inference_timeout_secs: match std::env::var("INFERENCE_TIMEOUT_SECS") {
                Ok(v) => parse_timeout_secs(&v)?,
                Err(_) => DEFAULT_INFERENCE_TIMEOUT_SECS,
            },
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

/// A zero timeout would fail every analysis instantly, so it is rejected
/// at startup rather than at request time.
fn parse_timeout_secs(value: &str) -> Result<u64> {
    let secs = value
        .parse::<u64>()
        .context("INFERENCE_TIMEOUT_SECS must be a positive integer")?;
    if secs == 0 {
        bail!("INFERENCE_TIMEOUT_SECS must be greater than zero");
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_parses_positive_seconds() {
        assert_eq!(parse_timeout_secs("120").unwrap(), 120);
    }

    #[test]
    fn test_timeout_rejects_zero() {
        assert!(parse_timeout_secs("0").is_err());
    }

    #[test]
    fn test_timeout_rejects_non_numeric() {
        assert!(parse_timeout_secs("soon").is_err());
    }
}
