//! Dual-head training objective.
//!
//! `total = full_loss + exit_weight * early_exit_loss`
//!
//! The early-exit head's private parameters only see the second term; the
//! layers below the exit depth see both.

use candle_core::Tensor;

use crate::error::{Error, Result};

/// Weighted sum of the full-depth and early-exit losses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainingObjective {
    exit_weight: f64,
}

impl Default for TrainingObjective {
    fn default() -> Self {
        Self { exit_weight: 1.0 }
    }
}

impl TrainingObjective {
    /// Create an objective; `exit_weight` must be finite and non-negative.
    pub fn new(exit_weight: f64) -> Result<Self> {
        if !(exit_weight >= 0.0 && exit_weight.is_finite()) {
            return Err(Error::invalid_config(format!(
                "exit_weight must be non-negative, got {exit_weight}"
            )));
        }
        Ok(Self { exit_weight })
    }

    /// Weight applied to the early-exit loss.
    pub fn exit_weight(&self) -> f64 {
        self.exit_weight
    }

    /// Combines both scalar losses into the optimization target.
    pub fn combine(&self, full_loss: &Tensor, early_exit_loss: &Tensor) -> Result<Tensor> {
        Ok(full_loss.add(&early_exit_loss.affine(self.exit_weight, 0.0)?)?)
    }
}
