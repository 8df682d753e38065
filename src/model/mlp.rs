//! SwiGLU feed-forward network.
//!
//! Reference: <https://arxiv.org/abs/2002.05202>

use candle_core::{Module, Result, Tensor};
use candle_nn::{linear_no_bias, Linear, VarBuilder};

/// `silu(x) = x * sigmoid(x)`
fn silu(x: &Tensor) -> Result<Tensor> {
    x.silu()
}

/// MLP with SwiGLU activation.
///
/// Formula: `output = down_proj(silu(gate_proj(x)) * up_proj(x))`
#[derive(Debug, Clone)]
pub struct SwiGluMlp {
    gate_proj: Linear,
    up_proj: Linear,
    down_proj: Linear,
    hidden_size: usize,
    intermediate_size: usize,
}

impl SwiGluMlp {
    /// Creates the MLP, registering its weights through `vb`.
    pub fn new(hidden_size: usize, intermediate_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            gate_proj: linear_no_bias(hidden_size, intermediate_size, vb.pp("gate_proj"))?,
            up_proj: linear_no_bias(hidden_size, intermediate_size, vb.pp("up_proj"))?,
            down_proj: linear_no_bias(intermediate_size, hidden_size, vb.pp("down_proj"))?,
            hidden_size,
            intermediate_size,
        })
    }

    /// Returns the hidden size.
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Returns the intermediate size.
    pub fn intermediate_size(&self) -> usize {
        self.intermediate_size
    }

    /// [..., hidden_size] -> [..., hidden_size]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let gate = silu(&self.gate_proj.forward(x)?)?;
        let up = self.up_proj.forward(x)?;
        self.down_proj.forward(&gate.mul(&up)?)
    }
}
