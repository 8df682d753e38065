//! Pre-norm decoder layer.

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::attention::CausalSelfAttention;
use super::mlp::SwiGluMlp;
use super::norm::RmsNorm;
use crate::config::ModelConfig;

/// One transformer block.
///
/// ```text
/// x ──► input_layernorm ──► self_attn ──► + ──► post_attention_layernorm ──► mlp ──► +
/// │                                       ▲  │                                      ▲
/// └───────────────────────────────────────┘  └──────────────────────────────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct DecoderLayer {
    input_layernorm: RmsNorm,
    self_attn: CausalSelfAttention,
    post_attention_layernorm: RmsNorm,
    mlp: SwiGluMlp,
}

impl DecoderLayer {
    /// Creates a decoder layer, registering its weights through `vb`.
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let input_layernorm =
            RmsNorm::load(config.hidden_size, config.rms_norm_eps, vb.pp("input_layernorm"))?;
        let self_attn = CausalSelfAttention::new(
            config.hidden_size,
            config.num_attention_heads,
            config.max_position_embeddings,
            config.rope_theta,
            config.rms_norm_eps,
            vb.pp("self_attn"),
        )?;
        let post_attention_layernorm = RmsNorm::load(
            config.hidden_size,
            config.rms_norm_eps,
            vb.pp("post_attention_layernorm"),
        )?;
        let mlp = SwiGluMlp::new(config.hidden_size, config.intermediate_size, vb.pp("mlp"))?;

        Ok(Self {
            input_layernorm,
            self_attn,
            post_attention_layernorm,
            mlp,
        })
    }

    /// Returns a reference to the attention module.
    pub fn self_attn(&self) -> &CausalSelfAttention {
        &self.self_attn
    }

    /// Returns a reference to the MLP module.
    pub fn mlp(&self) -> &SwiGluMlp {
        &self.mlp
    }

    /// [batch, seq_len, hidden_size] -> [batch, seq_len, hidden_size]
    pub fn forward(&self, hidden_states: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let residual = hidden_states;
        let attn_out = self
            .self_attn
            .forward(&self.input_layernorm.forward(hidden_states)?, mask)?;
        let hidden_states = (residual + attn_out)?;

        let mlp_out = self
            .mlp
            .forward(&self.post_attention_layernorm.forward(&hidden_states)?)?;
        hidden_states + mlp_out
    }
}
