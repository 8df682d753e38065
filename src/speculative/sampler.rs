//! Rejection sampling for speculative decoding.
//!
//! For each draft token `t` (left to right) with draft probability `q(t)` and
//! target probability `p(t)`:
//!
//! ```text
//! r ~ U(0, 1)
//! accept  if q(t) > 0 and r <= min(1, p(t) / q(t))
//! reject  otherwise -> resample from norm(max(0, p - q)) and stop
//! ```
//!
//! If every draft is accepted, one bonus token is drawn from the target
//! distribution at the position after the last draft. The emitted tokens are
//! distributed exactly as if sampled from the target alone.

use rand::distributions::Open01;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SamplingConfig;
use crate::engine::sampler::{normalize, Sampler};
use crate::error::{Error, Result};

/// Offset separating the acceptance stream from the token stream when both
/// derive from one seed.
const ACCEPTANCE_SEED_OFFSET: u64 = 0x9E37_79B9_7F4A_7C15;

/// Outcome of verifying one draft block.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    /// Accepted draft prefix.
    pub accepted: Vec<u32>,
    /// Per-position decisions in draft order; ends at the first rejection.
    pub acceptance_mask: Vec<bool>,
    /// Residual resample after a rejection, or the bonus token.
    pub final_token: u32,
    /// True when every draft was accepted and `final_token` is the bonus.
    pub bonus: bool,
}

impl Verification {
    /// Number of accepted draft tokens.
    pub fn num_accepted(&self) -> usize {
        self.accepted.len()
    }

    /// Tokens to append: accepted prefix followed by the final token.
    pub fn tokens(&self) -> Vec<u32> {
        let mut tokens = self.accepted.clone();
        tokens.push(self.final_token);
        tokens
    }
}

/// Probability of keeping a draft token: `min(1, p / q)`, or 0 when `q` is 0.
pub fn acceptance_probability(target_prob: f32, draft_prob: f32) -> f32 {
    if draft_prob <= 0.0 {
        return 0.0;
    }
    (target_prob / draft_prob).min(1.0)
}

/// `max(0, p - q)` renormalized.
///
/// When the positive part carries no mass (p <= q everywhere) the target
/// distribution itself is returned, so the result always sums to one.
pub fn residual_distribution(target_probs: &[f32], draft_probs: &[f32]) -> Vec<f32> {
    let mut residual: Vec<f32> = target_probs
        .iter()
        .zip(draft_probs)
        .map(|(&p, &q)| (p - q).max(0.0))
        .collect();

    let mass: f32 = residual.iter().sum();
    if mass > 0.0 {
        normalize(&mut residual);
    } else {
        residual.copy_from_slice(target_probs);
        normalize(&mut residual);
    }
    residual
}

/// Accept/reject stage of speculative decoding.
///
/// Owns the RNG for acceptance draws; token draws (residual or bonus) go
/// through the caller's [`Sampler`] so they share its stream with drafting.
#[derive(Debug, Clone)]
pub struct RejectionSampler {
    rng: StdRng,
}

impl Default for RejectionSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl RejectionSampler {
    /// Creates a sampler seeded from entropy.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a sampler with a seeded RNG for reproducibility.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Derives the acceptance stream from a sampling config's seed.
    pub fn from_config(config: &SamplingConfig) -> Self {
        match config.seed {
            Some(seed) => Self::with_seed(seed.wrapping_add(ACCEPTANCE_SEED_OFFSET)),
            None => Self::new(),
        }
    }

    /// Verifies a draft block.
    ///
    /// * `draft_tokens` - k drafted tokens
    /// * `draft_probs` - k draft distributions, one per drafted token
    /// * `target_probs` - k + 1 target distributions: one per draft position
    ///   plus the position following the last draft
    /// * `sampler` - draws the residual or bonus token
    pub fn verify(
        &mut self,
        draft_tokens: &[u32],
        draft_probs: &[Vec<f32>],
        target_probs: &[Vec<f32>],
        sampler: &mut Sampler,
    ) -> Result<Verification> {
        let k = draft_tokens.len();
        if draft_probs.len() != k {
            return Err(Error::Sampling(format!(
                "expected {k} draft distributions, got {}",
                draft_probs.len()
            )));
        }
        if target_probs.len() != k + 1 {
            return Err(Error::Sampling(format!(
                "expected {} target distributions, got {}",
                k + 1,
                target_probs.len()
            )));
        }
        let vocab_size = target_probs[0].len();
        if draft_probs
            .iter()
            .chain(target_probs)
            .any(|probs| probs.len() != vocab_size)
        {
            return Err(Error::Sampling(
                "draft and target distributions differ in vocabulary size".into(),
            ));
        }

        let mut accepted = Vec::with_capacity(k);
        let mut acceptance_mask = Vec::with_capacity(k);

        for (i, &token) in draft_tokens.iter().enumerate() {
            let t = token as usize;
            if t >= vocab_size {
                return Err(Error::TokenOutOfRange { token, vocab_size });
            }

            let threshold = acceptance_probability(target_probs[i][t], draft_probs[i][t]);
            let r: f32 = self.rng.sample(Open01);

            if draft_probs[i][t] > 0.0 && r <= threshold {
                accepted.push(token);
                acceptance_mask.push(true);
            } else {
                acceptance_mask.push(false);
                let residual = residual_distribution(&target_probs[i], &draft_probs[i]);
                let final_token = sampler.sample_probs(&residual)?;
                return Ok(Verification {
                    accepted,
                    acceptance_mask,
                    final_token,
                    bonus: false,
                });
            }
        }

        let final_token = sampler.sample_probs(&target_probs[k])?;
        Ok(Verification {
            accepted,
            acceptance_mask,
            final_token,
            bonus: true,
        })
    }
}
