//! Speculative decoding configuration.

use serde::{Deserialize, Serialize};

use crate::config::SamplingConfig;
use crate::error::{Error, Result};

/// Configuration for same-model speculative decoding.
///
/// The early-exit head drafts `gamma` tokens, the full-depth head verifies
/// them in a single forward pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeculativeConfig {
    /// Number of tokens drafted per verification pass (gamma).
    /// Higher values pay off when the early-exit head agrees with the full
    /// model often, and waste draft passes when it does not.
    pub gamma: usize,

    /// Sampling policy applied to both the draft and the target distributions.
    #[serde(default)]
    pub sampling: SamplingConfig,
}

impl Default for SpeculativeConfig {
    fn default() -> Self {
        Self {
            gamma: 5,
            sampling: SamplingConfig::default(),
        }
    }
}

impl SpeculativeConfig {
    /// Create a config drafting `gamma` tokens per block.
    pub fn new(gamma: usize) -> Self {
        Self {
            gamma,
            ..Default::default()
        }
    }

    /// Set the sampling policy.
    pub fn sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    /// Rejects a zero gamma and invalid sampling parameters.
    pub fn validate(&self) -> Result<()> {
        if self.gamma == 0 {
            return Err(Error::InvalidGamma(self.gamma));
        }
        self.sampling.strategy.validate()
    }
}
