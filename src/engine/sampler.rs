//! Token sampling.
//!
//! Turns a logit vector into a next-token probability vector under a
//! [`SamplingStrategy`], then draws from it:
//!
//! ```text
//! Logits [vocab_size]
//!     │
//!     ▼ Strategy (greedy one-hot / temperature / top-k / top-p)
//! Probabilities [vocab_size]   (zero outside the kept set, sums to 1)
//!     │
//!     ▼ Weighted draw with the sampler's RNG
//! Selected token
//! ```
//!
//! Keeping the full-vocabulary probability vector lets the speculative
//! decoder compare draft and target distributions token by token.

use std::cmp::Ordering;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{SamplingConfig, SamplingStrategy};
use crate::error::{Error, Result};

/// Token sampler with a configurable strategy and its own RNG.
#[derive(Debug, Clone)]
pub struct Sampler {
    strategy: SamplingStrategy,
    rng: StdRng,
}

impl Sampler {
    /// Creates a sampler; seeded from `config.seed` when present.
    pub fn new(config: &SamplingConfig) -> Result<Self> {
        config.strategy.validate()?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            strategy: config.strategy,
            rng,
        })
    }

    /// Creates a sampler with a specific seed, overriding the config's.
    pub fn with_seed(config: &SamplingConfig, seed: u64) -> Result<Self> {
        config.strategy.validate()?;
        Ok(Self {
            strategy: config.strategy,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Returns the active strategy.
    pub fn strategy(&self) -> SamplingStrategy {
        self.strategy
    }

    /// Next-token distribution over the whole vocabulary.
    pub fn probabilities(&self, logits: &[f32]) -> Result<Vec<f32>> {
        if logits.is_empty() {
            return Err(Error::Sampling("empty logit vector".into()));
        }
        if logits.iter().any(|l| l.is_nan()) {
            return Err(Error::Sampling("NaN in logit vector".into()));
        }
        let probs = match self.strategy {
            SamplingStrategy::Greedy => {
                let mut probs = vec![0.0; logits.len()];
                probs[argmax(logits)] = 1.0;
                probs
            }
            SamplingStrategy::Temperature { temperature } => softmax(logits, temperature),
            SamplingStrategy::TopK { k, temperature } => {
                let mut filtered = vec![f32::NEG_INFINITY; logits.len()];
                for i in ranked(logits).into_iter().take(k) {
                    filtered[i] = logits[i];
                }
                softmax(&filtered, temperature)
            }
            SamplingStrategy::TopP { p, temperature } => {
                let mut probs = softmax(logits, temperature);
                let order = ranked(&probs);

                // Keep tokens until cumulative mass exceeds p, including the
                // token that crosses it.
                let mut cumulative = 0.0f32;
                let mut cutoff = order.len();
                for (rank, &i) in order.iter().enumerate() {
                    cumulative += probs[i];
                    if cumulative > p {
                        cutoff = rank + 1;
                        break;
                    }
                }
                for &i in &order[cutoff..] {
                    probs[i] = 0.0;
                }
                normalize(&mut probs);
                probs
            }
        };

        if probs.iter().any(|p| !p.is_finite()) {
            return Err(Error::Sampling(
                "logits produced a non-finite distribution".into(),
            ));
        }
        Ok(probs)
    }

    /// Draws a token index from a probability vector.
    ///
    /// Zero-probability entries are never selected.
    pub fn sample_probs(&mut self, probs: &[f32]) -> Result<u32> {
        let dist = WeightedIndex::new(probs.iter().map(|&p| p as f64))
            .map_err(|e| Error::Sampling(format!("failed to create distribution: {e}")))?;
        Ok(dist.sample(&mut self.rng) as u32)
    }

    /// Samples a token from raw logits.
    pub fn sample(&mut self, logits: &[f32]) -> Result<u32> {
        let probs = self.probabilities(logits)?;
        self.sample_probs(&probs)
    }
}

/// Index of the largest logit (first one on ties).
fn argmax(values: &[f32]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_val), (i, &v)| {
            if v > best_val {
                (i, v)
            } else {
                (best, best_val)
            }
        })
        .0
}

/// Indices sorted by descending value; ties keep index order.
fn ranked(values: &[f32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal));
    order
}

/// Numerically stable softmax of `logits / temperature`.
fn softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut probs: Vec<f32> = logits
        .iter()
        .map(|&l| ((l - max) / temperature).exp())
        .collect();
    normalize(&mut probs);
    probs
}

pub(crate) fn normalize(probs: &mut [f32]) {
    let sum: f32 = probs.iter().sum();
    for p in probs.iter_mut() {
        *p /= sum;
    }
}
