//! Rotary Position Embeddings (RoPE).
//!
//! Reference: <https://arxiv.org/abs/2104.09864>

use candle_core::{DType, Device, Result, Tensor, D};

/// Rotary Position Embedding with precomputed cos/sin tables.
///
/// Every forward pass in this crate recomputes the whole prefix, so rotations
/// always start at position 0.
#[derive(Debug, Clone)]
pub struct RotaryEmbedding {
    /// [max_seq_len, head_dim]
    cos_cache: Tensor,
    /// [max_seq_len, head_dim]
    sin_cache: Tensor,
    dim: usize,
    max_seq_len: usize,
}

impl RotaryEmbedding {
    /// Creates a new RotaryEmbedding.
    ///
    /// `dim` must be even; the model config validates this before any layer
    /// is built.
    pub fn new(
        dim: usize,
        max_seq_len: usize,
        theta: f64,
        dtype: DType,
        device: &Device,
    ) -> Result<Self> {
        if dim % 2 != 0 {
            candle_core::bail!("RoPE dimension must be even, got {dim}");
        }

        // inv_freq[i] = 1 / theta^(2i/dim)
        let half_dim = dim / 2;
        let inv_freq: Vec<f32> = (0..half_dim)
            .map(|i| 1.0 / theta.powf(2.0 * i as f64 / dim as f64) as f32)
            .collect();
        let inv_freq = Tensor::new(inv_freq.as_slice(), device)?;

        let positions: Vec<f32> = (0..max_seq_len).map(|p| p as f32).collect();
        let positions = Tensor::new(positions.as_slice(), device)?.reshape((max_seq_len, 1))?;

        // [max_seq_len, dim/2] -> [max_seq_len, dim]
        let freqs = positions.broadcast_mul(&inv_freq)?;
        let freqs = Tensor::cat(&[&freqs, &freqs], 1)?;

        Ok(Self {
            cos_cache: freqs.cos()?.to_dtype(dtype)?,
            sin_cache: freqs.sin()?.to_dtype(dtype)?,
            dim,
            max_seq_len,
        })
    }

    /// Returns the head dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Longest sequence the tables cover.
    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    /// Rotates `x` of shape [batch, seq_len, num_heads, head_dim].
    ///
    /// `x_rot = x * cos + rotate_half(x) * sin`
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let (_, seq_len, _, _) = x.dims4()?;

        // [1, seq_len, 1, dim]
        let cos = self.cos_cache.narrow(0, 0, seq_len)?.unsqueeze(0)?.unsqueeze(2)?;
        let sin = self.sin_cache.narrow(0, 0, seq_len)?.unsqueeze(0)?.unsqueeze(2)?;

        let rotated = rotate_half(x)?;
        x.broadcast_mul(&cos)?.add(&rotated.broadcast_mul(&sin)?)
    }
}

/// `[x1, x2] -> [-x2, x1]` over the last dimension.
fn rotate_half(x: &Tensor) -> Result<Tensor> {
    let half = x.dim(D::Minus1)? / 2;
    let x1 = x.narrow(D::Minus1, 0, half)?;
    let x2 = x.narrow(D::Minus1, half, half)?;
    Tensor::cat(&[&x2.neg()?, &x1], D::Minus1)
}
