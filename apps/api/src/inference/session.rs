//! Model session — tokenizer, base weights, and the fine-tuned LoRA adapter
//! merged at load time.
//!
//! Loaded once at process start, then treated as read-only apart from the
//! KV cache inside the model (which is why generation takes `&mut self` and
//! the engine serializes access behind a mutex).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::qwen2::{Config as Qwen2Config, ModelForCausalLM};
use hf_hub::api::sync::Api;
use tokenizers::Tokenizer;
use tracing::info;

use crate::config::Config;
use crate::inference::{GenerationParams, InferenceError};

/// Generation stop marker for Qwen2-Instruct chat models.
const IM_END_TOKEN: &str = "<|im_end|>";
const ENDOFTEXT_TOKEN: &str = "<|endoftext|>";

/// Process-wide inference state: tokenizer + base model with the adapter
/// already merged into its weights.
pub struct ModelSession {
    tokenizer: Tokenizer,
    model: ModelForCausalLM,
    device: Device,
    eos_token_id: u32,
}

impl ModelSession {
    /// One-time startup load. Resolves base model files locally or from the
    /// HF Hub, merges the LoRA adapter into the base weights, and builds
    /// the model on the best available device (CUDA if present, else CPU).
    pub fn load(config: &Config) -> Result<Self> {
        let device = Device::cuda_if_available(0)?;
        let dtype = if device.is_cuda() {
            DType::BF16
        } else {
            DType::F32
        };
        info!(
            "Loading base model '{}' (device: {:?}, dtype: {:?})",
            config.model_id, device, dtype
        );

        let files = ModelFiles::resolve(&config.model_id)?;

        let tokenizer = Tokenizer::from_file(&files.tokenizer)
            .map_err(|e| anyhow!("Failed to load tokenizer: {e}"))?;

        let model_config: Qwen2Config = serde_json::from_slice(
            &fs::read(&files.config).context("Failed to read model config.json")?,
        )
        .context("Failed to parse model config.json")?;

        let mut weights: HashMap<String, Tensor> = HashMap::new();
        for shard in &files.weights {
            weights.extend(
                candle_core::safetensors::load(shard, &device)
                    .with_context(|| format!("Failed to load weights from {}", shard.display()))?,
            );
        }

        let (adapter, scale) = load_adapter(&config.adapter_path, &device)?;
        let merged = merge_adapter(&mut weights, &adapter, scale)?;
        info!(
            "Merged LoRA adapter from {} into {merged} weight tensors (scale: {scale})",
            config.adapter_path.display()
        );

        let vb = VarBuilder::from_tensors(weights, dtype, &device);
        let model = ModelForCausalLM::new(&model_config, vb)
            .context("Failed to build model from merged weights")?;

        let eos_token_id = tokenizer
            .token_to_id(IM_END_TOKEN)
            .or_else(|| tokenizer.token_to_id(ENDOFTEXT_TOKEN))
            .context("Tokenizer defines neither <|im_end|> nor <|endoftext|>")?;

        Ok(Self {
            tokenizer,
            model,
            device,
            eos_token_id,
        })
    }

    /// Runs one bounded generation pass over a fully formatted chat prompt
    /// and returns the decoded, trimmed completion (special tokens
    /// stripped). Blocking — call from a blocking thread.
    pub fn generate(
        &mut self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, InferenceError> {
        self.model.clear_kv_cache();

        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| InferenceError::Tokenizer(e.to_string()))?;
        let mut tokens: Vec<u32> = encoding.get_ids().to_vec();
        let prompt_len = tokens.len();

        let mut logits_processor = LogitsProcessor::new(
            params.seed,
            Some(params.temperature),
            Some(params.top_p),
        );

        let mut generated: Vec<u32> = Vec::new();
        for index in 0..params.max_new_tokens {
            // First pass feeds the whole prompt; afterwards the KV cache
            // holds history and only the last token is fed.
            let (context, offset) = if index == 0 {
                (&tokens[..], 0)
            } else {
                (&tokens[tokens.len() - 1..], tokens.len() - 1)
            };

            let input = Tensor::new(context, &self.device)?.unsqueeze(0)?;
            let logits = self.model.forward(&input, offset)?;
            let logits = logits.squeeze(0)?.squeeze(0)?.to_dtype(DType::F32)?;

            let next = logits_processor.sample(&logits)?;
            tokens.push(next);
            if next == self.eos_token_id {
                break;
            }
            generated.push(next);
        }

        tracing::debug!(
            "Generation finished: {} prompt tokens, {} new tokens",
            prompt_len,
            generated.len()
        );

        let text = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| InferenceError::Tokenizer(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Model file resolution
// ────────────────────────────────────────────────────────────────────────────

struct ModelFiles {
    tokenizer: PathBuf,
    config: PathBuf,
    weights: Vec<PathBuf>,
}

impl ModelFiles {
    /// A local directory is used as-is; anything else is treated as an HF
    /// Hub repo id and fetched (cached by hf-hub across restarts).
    fn resolve(model_id: &str) -> Result<Self> {
        let local = Path::new(model_id);
        if local.is_dir() {
            return Ok(Self {
                tokenizer: local.join("tokenizer.json"),
                config: local.join("config.json"),
                weights: safetensors_in_dir(local)?,
            });
        }

        let api = Api::new().context("Failed to initialize HF Hub API")?;
        let repo = api.model(model_id.to_string());

        let tokenizer = repo.get("tokenizer.json")?;
        let config = repo.get("config.json")?;

        // Sharded checkpoints carry an index file naming each shard.
        let weights = match repo.get("model.safetensors.index.json") {
            Ok(index_path) => {
                let index: serde_json::Value = serde_json::from_slice(&fs::read(&index_path)?)?;
                let weight_map = index
                    .get("weight_map")
                    .and_then(|v| v.as_object())
                    .context("Malformed model.safetensors.index.json: no weight_map")?;
                let mut shards: Vec<&str> = weight_map
                    .values()
                    .filter_map(|v| v.as_str())
                    .collect();
                shards.sort_unstable();
                shards.dedup();
                shards
                    .into_iter()
                    .map(|shard| repo.get(shard).map_err(anyhow::Error::from))
                    .collect::<Result<Vec<_>>>()?
            }
            Err(_) => vec![repo.get("model.safetensors")?],
        };

        Ok(Self {
            tokenizer,
            config,
            weights,
        })
    }
}

fn safetensors_in_dir(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();
    files.sort();
    if files.is_empty() {
        bail!("No .safetensors files found in {}", dir.display());
    }
    Ok(files)
}

// ────────────────────────────────────────────────────────────────────────────
// LoRA adapter merge
// ────────────────────────────────────────────────────────────────────────────

#[derive(serde::Deserialize)]
struct AdapterConfig {
    r: usize,
    lora_alpha: f64,
}

/// Loads the PEFT adapter tensors and the merge scale (alpha / r).
fn load_adapter(adapter_path: &Path, device: &Device) -> Result<(HashMap<String, Tensor>, f64)> {
    let config: AdapterConfig = serde_json::from_slice(
        &fs::read(adapter_path.join("adapter_config.json"))
            .with_context(|| format!("Failed to read adapter config in {}", adapter_path.display()))?,
    )
    .context("Failed to parse adapter_config.json")?;

    if config.r == 0 {
        bail!("adapter_config.json declares rank 0");
    }

    let tensors = candle_core::safetensors::load(
        adapter_path.join("adapter_model.safetensors"),
        device,
    )
    .context("Failed to load adapter_model.safetensors")?;

    Ok((tensors, config.lora_alpha / config.r as f64))
}

/// Folds every LoRA pair into its targeted base weight:
/// `W' = W + scale * B @ A`. The merge happens in f32 and is cast back to
/// the base tensor's dtype. Returns the number of merged tensors.
fn merge_adapter(
    weights: &mut HashMap<String, Tensor>,
    adapter: &HashMap<String, Tensor>,
    scale: f64,
) -> Result<usize> {
    let mut merged = 0usize;
    for (name, lora_a) in adapter {
        if !name.ends_with("lora_A.weight") {
            continue;
        }
        let b_name = name.replace("lora_A", "lora_B");
        let lora_b = adapter
            .get(&b_name)
            .with_context(|| format!("Adapter has {name} but no matching {b_name}"))?;

        let target = lora_target_key(name);
        let base = weights
            .get(&target)
            .with_context(|| format!("Adapter targets unknown base weight '{target}'"))?;

        let delta = lora_b
            .to_dtype(DType::F32)?
            .matmul(&lora_a.to_dtype(DType::F32)?)?
            .affine(scale, 0.0)?;
        let updated = base.to_dtype(DType::F32)?.add(&delta)?.to_dtype(base.dtype())?;
        weights.insert(target, updated);
        merged += 1;
    }

    if merged == 0 {
        bail!("Adapter contained no lora_A/lora_B weight pairs");
    }
    Ok(merged)
}

/// Maps a PEFT adapter tensor name to the base weight it targets, e.g.
/// `base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight`
/// → `model.layers.0.self_attn.q_proj.weight`.
fn lora_target_key(adapter_key: &str) -> String {
    let key = adapter_key
        .strip_prefix("base_model.model.")
        .unwrap_or(adapter_key);
    key.replace(".lora_A.weight", ".weight")
        .replace(".lora_B.weight", ".weight")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lora_target_key_strips_peft_prefix_and_suffix() {
        let key = "base_model.model.model.layers.0.self_attn.q_proj.lora_A.weight";
        assert_eq!(
            lora_target_key(key),
            "model.layers.0.self_attn.q_proj.weight"
        );
    }

    #[test]
    fn test_lora_target_key_handles_b_side() {
        let key = "base_model.model.model.layers.17.mlp.down_proj.lora_B.weight";
        assert_eq!(
            lora_target_key(key),
            "model.layers.17.mlp.down_proj.weight"
        );
    }

    #[test]
    fn test_lora_target_key_without_prefix_is_untouched_otherwise() {
        let key = "model.layers.3.self_attn.v_proj.lora_A.weight";
        assert_eq!(
            lora_target_key(key),
            "model.layers.3.self_attn.v_proj.weight"
        );
    }

    #[test]
    fn test_merge_scale_is_alpha_over_rank() {
        // Mirrors load_adapter's scale computation.
        let config = AdapterConfig {
            r: 16,
            lora_alpha: 32.0,
        };
        assert!((config.lora_alpha / config.r as f64 - 2.0).abs() < f64::EPSILON);
    }
}
