//! Transformer with an early-exit prediction head.
//!
//! One parameter set, two read-out depths:
//!
//! ```text
//! Input Token IDs
//!       │
//!       ▼
//!   Embedding
//!       │
//!       ▼
//! DecoderLayer × early_exit_layer ──► RmsNorm ──► exit proj ──► early-exit logits
//!       │
//!       ▼
//! DecoderLayer × (num_hidden_layers - early_exit_layer)
//!       │
//!       ▼
//!    RmsNorm ──► LM head ──► full-depth logits
//! ```
//!
//! The exit depth is read from the config at construction and never changes.

use candle_core::{DType, Device, Module, Tensor, Var};
use candle_nn::{embedding, linear_no_bias, Embedding, Linear, VarBuilder, VarMap};
use tracing::debug;

use super::attention::causal_mask;
use super::decoder::DecoderLayer;
use super::norm::RmsNorm;
use super::EarlyExitLm;
use crate::config::ModelConfig;
use crate::error::{Error, Result};

/// Variable-name prefix of the early-exit head's private parameters.
pub const EARLY_EXIT_PREFIX: &str = "early_exit";

/// Logits from both read-out depths of a single forward pass.
#[derive(Debug, Clone)]
pub struct EarlyExitOutput {
    /// Full-depth logits [batch, seq_len, vocab_size].
    pub logits: Tensor,
    /// Early-exit logits [batch, seq_len, vocab_size].
    pub early_exit_logits: Tensor,
}

/// Private head reading the residual stream at the exit depth.
#[derive(Debug, Clone)]
struct EarlyExitHead {
    norm: RmsNorm,
    proj: Linear,
}

impl EarlyExitHead {
    fn new(config: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        Ok(Self {
            norm: RmsNorm::load(config.hidden_size, config.rms_norm_eps, vb.pp("norm"))?,
            proj: linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("proj"))?,
        })
    }

    fn forward(&self, hidden_states: &Tensor) -> candle_core::Result<Tensor> {
        self.proj.forward(&self.norm.forward(hidden_states)?)
    }
}

/// Causal language model with a full-depth and an early-exit head.
pub struct EarlyExitTransformer {
    embed_tokens: Embedding,
    layers: Vec<DecoderLayer>,
    norm: RmsNorm,
    lm_head: Linear,
    early_exit: EarlyExitHead,
    config: ModelConfig,
    var_map: VarMap,
    device: Device,
    dtype: DType,
}

impl EarlyExitTransformer {
    /// Creates a randomly initialized F32 model.
    pub fn new(config: &ModelConfig, device: &Device) -> Result<Self> {
        Self::from_varmap(config, VarMap::new(), DType::F32, device)
    }

    /// Creates a model whose parameters live in `var_map`.
    ///
    /// Variables already present in the map are reused, so a map loaded from
    /// disk restores trained weights.
    pub fn from_varmap(
        config: &ModelConfig,
        var_map: VarMap,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        config.validate()?;
        let vb = VarBuilder::from_varmap(&var_map, dtype, device);

        let embed_tokens = embedding(config.vocab_size, config.hidden_size, vb.pp("embed_tokens"))?;

        let mut layers = Vec::with_capacity(config.num_hidden_layers);
        for i in 0..config.num_hidden_layers {
            layers.push(DecoderLayer::new(config, vb.pp(format!("layers.{i}")))?);
        }

        let norm = RmsNorm::load(config.hidden_size, config.rms_norm_eps, vb.pp("norm"))?;
        let lm_head = linear_no_bias(config.hidden_size, config.vocab_size, vb.pp("lm_head"))?;
        let early_exit = EarlyExitHead::new(config, vb.pp(EARLY_EXIT_PREFIX))?;

        debug!(
            layers = config.num_hidden_layers,
            early_exit_layer = config.early_exit_layer,
            hidden_size = config.hidden_size,
            "built early-exit transformer"
        );

        Ok(Self {
            embed_tokens,
            layers,
            norm,
            lm_head,
            early_exit,
            config: config.clone(),
            var_map,
            device: device.clone(),
            dtype,
        })
    }

    /// Embeds `input_ids` [batch, seq_len] and builds the matching causal mask.
    fn embed(&self, input_ids: &Tensor) -> Result<(Tensor, Tensor)> {
        let (_, seq_len) = input_ids.dims2()?;
        if seq_len == 0 {
            return Err(Error::SequenceTooShort { len: 0 });
        }
        if seq_len > self.config.max_position_embeddings {
            return Err(Error::SequenceTooLong {
                len: seq_len,
                max: self.config.max_position_embeddings,
            });
        }
        let hidden_states = self.embed_tokens.forward(input_ids)?;
        let mask = causal_mask(seq_len, self.dtype, &self.device)?;
        Ok((hidden_states, mask))
    }

    /// Runs the backbone once and reads out both heads.
    pub fn forward(&self, input_ids: &Tensor) -> Result<EarlyExitOutput> {
        let (mut hidden_states, mask) = self.embed(input_ids)?;
        let mut early_exit_logits = None;

        for (i, layer) in self.layers.iter().enumerate() {
            hidden_states = layer.forward(&hidden_states, &mask)?;
            if i + 1 == self.config.early_exit_layer {
                early_exit_logits = Some(self.early_exit.forward(&hidden_states)?);
            }
        }

        let early_exit_logits = early_exit_logits.ok_or_else(|| {
            Error::invalid_config(format!(
                "early_exit_layer {} never reached",
                self.config.early_exit_layer
            ))
        })?;
        let logits = self.lm_head.forward(&self.norm.forward(&hidden_states)?)?;

        Ok(EarlyExitOutput {
            logits,
            early_exit_logits,
        })
    }

    /// Mean next-token cross-entropy of both heads.
    ///
    /// `sequence` is [batch, L + 1]: positions `0..L` are inputs and
    /// `1..=L` are targets. Returns `(full_loss, early_exit_loss)` as scalar
    /// tensors attached to the autograd graph.
    pub fn loss(&self, sequence: &Tensor) -> Result<(Tensor, Tensor)> {
        let (batch, len) = sequence.dims2()?;
        if len < 2 {
            return Err(Error::SequenceTooShort { len });
        }
        let inputs = sequence.narrow(1, 0, len - 1)?;
        let targets = sequence
            .narrow(1, 1, len - 1)?
            .reshape(batch * (len - 1))?;

        let output = self.forward(&inputs)?;
        let vocab = self.config.vocab_size;
        let flat = |logits: &Tensor| logits.reshape((batch * (len - 1), vocab));

        let full_loss = candle_nn::loss::cross_entropy(&flat(&output.logits)?, &targets)?;
        let early_exit_loss =
            candle_nn::loss::cross_entropy(&flat(&output.early_exit_logits)?, &targets)?;
        Ok((full_loss, early_exit_loss))
    }

    /// Returns the model configuration.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of layers run before the early-exit head.
    pub fn early_exit_layer(&self) -> usize {
        self.config.early_exit_layer
    }

    /// Returns the number of layers.
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Parameter store shared by both heads.
    pub fn var_map(&self) -> &VarMap {
        &self.var_map
    }

    /// All trainable variables.
    pub fn trainable_vars(&self) -> Vec<Var> {
        self.var_map.all_vars()
    }

    /// Variables owned only by the early-exit head.
    pub fn early_exit_vars(&self) -> Vec<Var> {
        let prefix = format!("{EARLY_EXIT_PREFIX}.");
        let data = self
            .var_map
            .data()
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        data.iter()
            .filter(|(name, _)| name.starts_with(&prefix))
            .map(|(_, var)| var.clone())
            .collect()
    }

    /// Total number of scalar parameters.
    pub fn parameter_count(&self) -> usize {
        self.trainable_vars().iter().map(|v| v.elem_count()).sum()
    }

    /// Returns the data type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }
}

impl EarlyExitLm for EarlyExitTransformer {
    fn device(&self) -> &Device {
        &self.device
    }

    fn vocab_size(&self) -> usize {
        self.config.vocab_size
    }

    fn forward_full(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (mut hidden_states, mask) = self.embed(input_ids)?;
        for layer in &self.layers {
            hidden_states = layer.forward(&hidden_states, &mask)?;
        }
        Ok(self.lm_head.forward(&self.norm.forward(&hidden_states)?)?)
    }

    fn forward_early_exit(&self, input_ids: &Tensor) -> Result<Tensor> {
        let (mut hidden_states, mask) = self.embed(input_ids)?;
        for layer in &self.layers[..self.config.early_exit_layer] {
            hidden_states = layer.forward(&hidden_states, &mask)?;
        }
        Ok(self.early_exit.forward(&hidden_states)?)
    }
}
