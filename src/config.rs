//! Configuration types for model construction, sampling and training.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Model configuration (pre-norm causal transformer with an early-exit head).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Vocabulary size.
    pub vocab_size: usize,
    /// Hidden (embedding) dimension.
    pub hidden_size: usize,
    /// Intermediate dimension (MLP).
    pub intermediate_size: usize,
    /// Number of transformer layers.
    pub num_hidden_layers: usize,
    /// Number of layers run before the early-exit head reads the residual stream.
    /// Must satisfy `1 <= early_exit_layer < num_hidden_layers`.
    pub early_exit_layer: usize,
    /// Number of attention heads.
    pub num_attention_heads: usize,
    /// RMSNorm epsilon.
    #[serde(default = "default_rms_norm_eps")]
    pub rms_norm_eps: f64,
    /// RoPE theta.
    #[serde(default = "default_rope_theta")]
    pub rope_theta: f64,
    /// Maximum sequence length.
    pub max_position_embeddings: usize,
}

fn default_rms_norm_eps() -> f64 {
    1e-6
}

fn default_rope_theta() -> f64 {
    10000.0
}

impl Default for ModelConfig {
    fn default() -> Self {
        // Byte-level enwik8 model: 256 tokens, dim 512, depth 10, exit after layer 2
        Self {
            vocab_size: 256,
            hidden_size: 512,
            intermediate_size: 2048,
            num_hidden_layers: 10,
            early_exit_layer: 2,
            num_attention_heads: 8,
            rms_norm_eps: default_rms_norm_eps(),
            rope_theta: default_rope_theta(),
            max_position_embeddings: 1024,
        }
    }
}

impl ModelConfig {
    /// Tiny configuration for tests and smoke runs.
    pub fn tiny() -> Self {
        Self {
            vocab_size: 16,
            hidden_size: 32,
            intermediate_size: 64,
            num_hidden_layers: 3,
            early_exit_layer: 1,
            num_attention_heads: 4,
            rms_norm_eps: default_rms_norm_eps(),
            rope_theta: default_rope_theta(),
            max_position_embeddings: 64,
        }
    }

    /// Head dimension (hidden_size / num_attention_heads).
    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Checks structural constraints, failing fast on the first violation.
    pub fn validate(&self) -> Result<()> {
        if self.vocab_size == 0 {
            return Err(Error::invalid_config("vocab_size must be positive"));
        }
        if self.num_hidden_layers < 2 {
            return Err(Error::invalid_config(
                "num_hidden_layers must be at least 2 to leave room for an early exit",
            ));
        }
        if self.early_exit_layer == 0 || self.early_exit_layer >= self.num_hidden_layers {
            return Err(Error::invalid_config(format!(
                "early_exit_layer must be in [1, {}), got {}",
                self.num_hidden_layers, self.early_exit_layer
            )));
        }
        if self.num_attention_heads == 0 || self.hidden_size % self.num_attention_heads != 0 {
            return Err(Error::invalid_config(format!(
                "hidden_size ({}) must be divisible by num_attention_heads ({})",
                self.hidden_size, self.num_attention_heads
            )));
        }
        if self.head_dim() % 2 != 0 {
            return Err(Error::invalid_config("head_dim must be even for RoPE"));
        }
        if self.max_position_embeddings == 0 {
            return Err(Error::invalid_config("max_position_embeddings must be positive"));
        }
        Ok(())
    }

    /// Loads a model configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}

/// How a next token is chosen from a logit vector.
///
/// Both decoders turn logits into a probability vector through the same
/// strategy, so base and speculative decoding sample the same distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplingStrategy {
    /// Always pick the highest-scoring token (one-hot distribution).
    Greedy,
    /// Softmax of `logits / temperature`.
    Temperature { temperature: f32 },
    /// Keep the `k` highest logits, then temperature softmax.
    TopK { k: usize, temperature: f32 },
    /// Temperature softmax, then keep the smallest prefix covering mass `p`.
    TopP { p: f32, temperature: f32 },
}

impl Default for SamplingStrategy {
    fn default() -> Self {
        Self::Temperature { temperature: 1.0 }
    }
}

impl SamplingStrategy {
    /// Checks parameter ranges.
    pub fn validate(&self) -> Result<()> {
        let temperature = match *self {
            Self::Greedy => return Ok(()),
            Self::Temperature { temperature } => temperature,
            Self::TopK { k, temperature } => {
                if k == 0 {
                    return Err(Error::invalid_config("top-k requires k > 0"));
                }
                temperature
            }
            Self::TopP { p, temperature } => {
                if !(p > 0.0 && p <= 1.0) {
                    return Err(Error::invalid_config(format!(
                        "top-p requires p in (0, 1], got {p}"
                    )));
                }
                temperature
            }
        };
        if !(temperature > 0.0 && temperature.is_finite()) {
            return Err(Error::invalid_config(format!(
                "temperature must be positive and finite, got {temperature}"
            )));
        }
        Ok(())
    }
}

/// Sampling configuration shared by both decoders.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Strategy applied to every next-token distribution.
    #[serde(default)]
    pub strategy: SamplingStrategy,
    /// RNG seed (None = seeded from entropy).
    #[serde(default)]
    pub seed: Option<u64>,
}

impl SamplingConfig {
    /// Creates a config with the given strategy and no seed.
    pub fn new(strategy: SamplingStrategy) -> Self {
        Self { strategy, seed: None }
    }

    /// Greedy decoding.
    pub fn greedy() -> Self {
        Self::new(SamplingStrategy::Greedy)
    }

    /// Set the RNG seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Training loop configuration.
///
/// Defaults follow the enwik8 character-level recipe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Number of optimizer steps.
    pub num_batches: usize,
    /// Sequences per micro-batch.
    pub batch_size: usize,
    /// Micro-batches averaged into one optimizer step.
    pub grad_accum_every: usize,
    /// AdamW learning rate.
    pub learning_rate: f64,
    /// Steps between validation passes.
    pub validate_every: usize,
    /// Steps between generation comparisons.
    pub generate_every: usize,
    /// Prompt length for generation comparisons.
    pub prime_length: usize,
    /// Total generated sequence length (prompt included).
    pub generate_length: usize,
    /// Training sequence length (each sample holds `seq_len + 1` tokens).
    pub seq_len: usize,
    /// Draft tokens per speculative block.
    pub gamma: usize,
    /// Weight of the early-exit loss term.
    pub exit_weight: f64,
    /// Global gradient-norm ceiling.
    pub max_grad_norm: f64,
    /// Seed for batch sampling and generation.
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            num_batches: 100_000,
            batch_size: 4,
            grad_accum_every: 4,
            learning_rate: 1e-4,
            validate_every: 100,
            generate_every: 500,
            prime_length: 128,
            generate_length: 512,
            seq_len: 512,
            gamma: 5,
            exit_weight: 1.0,
            max_grad_norm: 0.5,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Checks ranges that would otherwise fail mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 || self.grad_accum_every == 0 {
            return Err(Error::invalid_config(
                "batch_size and grad_accum_every must be positive",
            ));
        }
        if self.seq_len == 0 {
            return Err(Error::invalid_config("seq_len must be positive"));
        }
        if self.gamma == 0 {
            return Err(Error::InvalidGamma(self.gamma));
        }
        if !(self.exit_weight >= 0.0 && self.exit_weight.is_finite()) {
            return Err(Error::invalid_config(format!(
                "exit_weight must be non-negative, got {}",
                self.exit_weight
            )));
        }
        if !(self.max_grad_norm > 0.0) {
            return Err(Error::invalid_config("max_grad_norm must be positive"));
        }
        if self.prime_length == 0 || self.prime_length > self.generate_length {
            return Err(Error::invalid_config(
                "prime_length must be in [1, generate_length]",
            ));
        }
        if self.validate_every == 0 || self.generate_every == 0 {
            return Err(Error::invalid_config(
                "validate_every and generate_every must be positive",
            ));
        }
        Ok(())
    }

    /// Loads a training configuration from a JSON file; missing keys keep defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Whether a validation pass runs at step index `step` (0-based).
    pub fn validates_at(&self, step: usize) -> bool {
        step % self.validate_every == 0
    }

    /// Whether a generation comparison runs at step index `step` (0-based).
    pub fn generates_at(&self, step: usize) -> bool {
        step % self.generate_every == 0
    }
}
