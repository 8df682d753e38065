//! RMS Normalization.
//!
//! Rescales inputs by their root mean square, without centering.
//!
//! Reference: <https://arxiv.org/abs/1910.07467>

use candle_core::{Result, Tensor, D};
use candle_nn::{Init, VarBuilder};

/// RMS Normalization layer.
///
/// Formula: `output = (x / rms(x)) * weight`
/// where `rms(x) = sqrt(mean(x^2) + eps)`
#[derive(Debug, Clone)]
pub struct RmsNorm {
    /// Learnable scale parameter [hidden_size].
    weight: Tensor,
    eps: f64,
}

impl RmsNorm {
    /// Creates a new RmsNorm layer from an existing weight tensor.
    pub fn new(weight: Tensor, eps: f64) -> Self {
        Self { weight, eps }
    }

    /// Creates a trainable RmsNorm whose scale starts at one.
    ///
    /// With a `VarMap`-backed builder the weight is registered as a variable
    /// under `{prefix}.weight`.
    pub fn load(hidden_size: usize, eps: f64, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get_with_hints(hidden_size, "weight", Init::Const(1.0))?;
        Ok(Self { weight, eps })
    }

    /// Returns a reference to the weight tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Returns the epsilon value.
    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Applies RMS normalization over the last dimension.
    ///
    /// ```text
    /// rms = sqrt(mean(x^2, dim=-1, keepdim=True) + eps)
    /// output = (x / rms) * weight
    /// ```
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let variance = x.sqr()?.mean_keepdim(D::Minus1)?;
        let rms = (variance + self.eps)?.sqrt()?;
        x.broadcast_div(&rms)?.broadcast_mul(&self.weight)
    }
}
