//! Causal multi-head self-attention.
//!
//! Qwen3-style block with:
//! - Per-head RMSNorm on Q and K
//! - Rotary Position Embeddings (RoPE)
//! - Full recomputation over the prefix (no KV cache)

use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

use super::norm::RmsNorm;
use super::rope::RotaryEmbedding;

/// Multi-head causal self-attention.
#[derive(Debug, Clone)]
pub struct CausalSelfAttention {
    /// [hidden_size] -> [num_heads * head_dim]
    q_proj: Linear,
    k_proj: Linear,
    v_proj: Linear,
    /// [num_heads * head_dim] -> [hidden_size]
    o_proj: Linear,
    q_norm: RmsNorm,
    k_norm: RmsNorm,
    rotary_emb: RotaryEmbedding,
    num_heads: usize,
    head_dim: usize,
    scale: f64,
}

impl CausalSelfAttention {
    /// Creates the attention block, registering its weights through `vb`.
    pub fn new(
        hidden_size: usize,
        num_heads: usize,
        max_seq_len: usize,
        rope_theta: f64,
        rms_norm_eps: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let head_dim = hidden_size / num_heads;
        let q_proj = linear_no_bias(hidden_size, num_heads * head_dim, vb.pp("q_proj"))?;
        let k_proj = linear_no_bias(hidden_size, num_heads * head_dim, vb.pp("k_proj"))?;
        let v_proj = linear_no_bias(hidden_size, num_heads * head_dim, vb.pp("v_proj"))?;
        let o_proj = linear_no_bias(num_heads * head_dim, hidden_size, vb.pp("o_proj"))?;

        let q_norm = RmsNorm::load(head_dim, rms_norm_eps, vb.pp("q_norm"))?;
        let k_norm = RmsNorm::load(head_dim, rms_norm_eps, vb.pp("k_norm"))?;

        let rotary_emb =
            RotaryEmbedding::new(head_dim, max_seq_len, rope_theta, vb.dtype(), vb.device())?;

        Ok(Self {
            q_proj,
            k_proj,
            v_proj,
            o_proj,
            q_norm,
            k_norm,
            rotary_emb,
            num_heads,
            head_dim,
            scale: 1.0 / (head_dim as f64).sqrt(),
        })
    }

    /// Returns the number of heads.
    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    /// Returns the head dimension.
    pub fn head_dim(&self) -> usize {
        self.head_dim
    }

    /// Forward pass.
    ///
    /// * `hidden_states` - [batch, seq_len, hidden_size]
    /// * `mask` - additive causal mask broadcastable to [batch, heads, seq_len, seq_len]
    pub fn forward(&self, hidden_states: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (batch_size, seq_len, _) = hidden_states.dims3()?;
        let heads_shape = (batch_size, seq_len, self.num_heads, self.head_dim);

        let q = self.q_proj.forward(hidden_states)?.reshape(heads_shape)?;
        let k = self.k_proj.forward(hidden_states)?.reshape(heads_shape)?;
        let v = self.v_proj.forward(hidden_states)?.reshape(heads_shape)?;

        let q = self.rotary_emb.apply(&self.q_norm.forward(&q)?)?;
        let k = self.rotary_emb.apply(&self.k_norm.forward(&k)?)?;

        // [batch, num_heads, seq_len, head_dim]
        let q = q.transpose(1, 2)?.contiguous()?;
        let k = k.transpose(1, 2)?.contiguous()?;
        let v = v.transpose(1, 2)?.contiguous()?;

        let attn_weights = (q.matmul(&k.transpose(D::Minus2, D::Minus1)?)? * self.scale)?;
        let attn_weights = attn_weights.broadcast_add(mask)?;
        let attn_weights = candle_nn::ops::softmax(&attn_weights, D::Minus1)?;

        let attn_output = attn_weights
            .matmul(&v)?
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch_size, seq_len, self.num_heads * self.head_dim))?;

        self.o_proj.forward(&attn_output)
    }
}

/// Additive causal mask [1, 1, seq_len, seq_len]: 0 on and below the diagonal,
/// -inf above it.
pub fn causal_mask(seq_len: usize, dtype: DType, device: &Device) -> Result<Tensor> {
    let mask: Vec<f32> = (0..seq_len)
        .flat_map(|query| {
            (0..seq_len).map(move |key| if key > query { f32::NEG_INFINITY } else { 0.0 })
        })
        .collect();
    Tensor::from_vec(mask, (1, 1, seq_len, seq_len), device)?.to_dtype(dtype)
}
