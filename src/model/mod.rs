//! Model implementations.
//!
//! This module contains:
//! - Transformer building blocks (RMSNorm, RoPE, causal attention, SwiGLU)
//! - The early-exit transformer and the two-depth query interface the
//!   decoders consume

pub mod attention;
pub mod decoder;
pub mod early_exit;
pub mod mlp;
pub mod norm;
pub mod rope;

use candle_core::{DType, Device, IndexOp, Tensor};

pub use attention::{causal_mask, CausalSelfAttention};
pub use decoder::DecoderLayer;
pub use early_exit::{EarlyExitOutput, EarlyExitTransformer, EARLY_EXIT_PREFIX};
pub use mlp::SwiGluMlp;
pub use norm::RmsNorm;
pub use rope::RotaryEmbedding;

use crate::error::{Error, Result};

/// A causal language model readable at two depths.
///
/// Both queries run against the same parameters; `forward_early_exit` is the
/// cheap path that stops at the exit depth, `forward_full` runs every layer.
/// Inputs are token ids [batch, seq_len] (`u32`), outputs are logits
/// [batch, seq_len, vocab_size].
pub trait EarlyExitLm {
    /// Device the model's tensors live on.
    fn device(&self) -> &Device;

    /// Size of the output vocabulary.
    fn vocab_size(&self) -> usize;

    /// Full-depth logits.
    fn forward_full(&self, input_ids: &Tensor) -> Result<Tensor>;

    /// Early-exit logits.
    fn forward_early_exit(&self, input_ids: &Tensor) -> Result<Tensor>;
}

/// Builds a [1, len] id tensor for a single sequence.
pub fn sequence_tensor(tokens: &[u32], device: &Device) -> Result<Tensor> {
    Ok(Tensor::new(tokens, device)?.unsqueeze(0)?)
}

/// Logits of the first batch row at `position`, as an f32 vector.
pub fn logits_at(logits: &Tensor, position: usize) -> Result<Vec<f32>> {
    let (_, seq_len, _) = logits.dims3()?;
    if position >= seq_len {
        return Err(Error::SequenceTooShort { len: seq_len });
    }
    Ok(logits.i((0, position))?.to_dtype(DType::F32)?.to_vec1()?)
}

/// Logits of the first batch row at the last position.
pub fn last_logits(logits: &Tensor) -> Result<Vec<f32>> {
    let (_, seq_len, _) = logits.dims3()?;
    if seq_len == 0 {
        return Err(Error::SequenceTooShort { len: 0 });
    }
    logits_at(logits, seq_len - 1)
}
