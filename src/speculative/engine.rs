//! Same-model speculative decoding.
//!
//! The early-exit head drafts, the full-depth head verifies, and rejection
//! sampling decides which drafts survive.

use tracing::debug;

use super::config::SpeculativeConfig;
use super::sampler::{RejectionSampler, Verification};
use crate::config::SamplingConfig;
use crate::engine::base::check_prompt;
use crate::engine::sampler::Sampler;
use crate::error::{Error, Result};
use crate::model::{last_logits, logits_at, sequence_tensor, EarlyExitLm};

/// Running acceptance statistics across draft blocks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeculativeStats {
    /// Verification passes run.
    pub blocks: usize,
    /// Draft tokens proposed.
    pub drafted: usize,
    /// Draft tokens accepted.
    pub accepted: usize,
    /// Blocks that ended with a bonus token.
    pub bonus_tokens: usize,
    /// Blocks that ended with a residual resample.
    pub resampled: usize,
}

impl SpeculativeStats {
    fn record(&mut self, drafted: usize, verification: &Verification) {
        self.blocks += 1;
        self.drafted += drafted;
        self.accepted += verification.num_accepted();
        if verification.bonus {
            self.bonus_tokens += 1;
        } else {
            self.resampled += 1;
        }
    }

    /// Average number of accepted draft tokens per block.
    pub fn avg_accepted(&self) -> f64 {
        if self.blocks == 0 {
            return 0.0;
        }
        self.accepted as f64 / self.blocks as f64
    }

    /// Fraction of drafted tokens accepted.
    pub fn acceptance_rate(&self) -> f64 {
        if self.drafted == 0 {
            return 0.0;
        }
        self.accepted as f64 / self.drafted as f64
    }

    /// Tokens emitted per verification pass.
    pub fn tokens_per_block(&self) -> f64 {
        if self.blocks == 0 {
            return 0.0;
        }
        (self.accepted + self.blocks) as f64 / self.blocks as f64
    }
}

/// Result of a speculative decode.
#[derive(Debug, Clone)]
pub struct SpeculativeOutput {
    /// Prompt followed by the generated continuation.
    pub tokens: Vec<u32>,
    /// Average accepted draft tokens per block.
    pub avg_accepted: f64,
    /// Full statistics.
    pub stats: SpeculativeStats,
}

/// Speculative decoder over a single early-exit model.
///
/// Holds the model by shared reference, so draft and verify passes in a
/// step always see the same parameters.
pub struct SpeculativeDecoder<'m, M: EarlyExitLm + ?Sized> {
    model: &'m M,
    config: SpeculativeConfig,
    /// Token stream: drafts, residual resamples and bonus tokens.
    sampler: Sampler,
    /// Acceptance stream.
    rejection_sampler: RejectionSampler,
    stats: SpeculativeStats,
}

impl<'m, M: EarlyExitLm + ?Sized> SpeculativeDecoder<'m, M> {
    /// Create a decoder; fails on a zero gamma or invalid sampling parameters.
    pub fn new(model: &'m M, config: SpeculativeConfig) -> Result<Self> {
        config.validate()?;
        let sampler = Sampler::new(&config.sampling)?;
        let rejection_sampler = RejectionSampler::from_config(&config.sampling);
        Ok(Self {
            model,
            config,
            sampler,
            rejection_sampler,
            stats: SpeculativeStats::default(),
        })
    }

    /// Drafts `k` tokens after `tokens` with the early-exit head.
    ///
    /// Returns the drafted tokens and the draft distribution each was
    /// sampled from.
    fn draft(&mut self, tokens: &[u32], k: usize) -> Result<(Vec<u32>, Vec<Vec<f32>>)> {
        let mut extended = tokens.to_vec();
        let mut draft_tokens = Vec::with_capacity(k);
        let mut draft_probs = Vec::with_capacity(k);

        for _ in 0..k {
            let input_ids = sequence_tensor(&extended, self.model.device())?;
            let logits = self.model.forward_early_exit(&input_ids)?;
            let probs = self.sampler.probabilities(&last_logits(&logits)?)?;
            let token = self.sampler.sample_probs(&probs)?;

            draft_tokens.push(token);
            draft_probs.push(probs);
            extended.push(token);
        }

        Ok((draft_tokens, draft_probs))
    }

    /// One full-depth pass over `tokens ++ draft_tokens`.
    ///
    /// Returns target distributions for each draft position and for the
    /// position after the last draft (k + 1 vectors).
    fn verify(&self, tokens: &[u32], draft_tokens: &[u32]) -> Result<Vec<Vec<f32>>> {
        let mut extended = Vec::with_capacity(tokens.len() + draft_tokens.len());
        extended.extend_from_slice(tokens);
        extended.extend_from_slice(draft_tokens);

        let input_ids = sequence_tensor(&extended, self.model.device())?;
        let logits = self.model.forward_full(&input_ids)?;

        // Logits at position n - 1 + i predict draft i.
        let start = tokens.len() - 1;
        (0..=draft_tokens.len())
            .map(|i| self.sampler.probabilities(&logits_at(&logits, start + i)?))
            .collect()
    }

    /// Runs one draft/verify/accept block and appends the result to `tokens`.
    ///
    /// The block is truncated so that the sequence never grows past
    /// `length`. Returns `None` once `length` is reached.
    pub fn step(&mut self, tokens: &mut Vec<u32>, length: usize) -> Result<Option<Verification>> {
        if tokens.is_empty() {
            return Err(Error::EmptyPrompt);
        }
        if tokens.len() >= length {
            return Ok(None);
        }
        let remaining = length - tokens.len();
        let k = self.config.gamma.min(remaining - 1);

        let (draft_tokens, draft_probs) = self.draft(tokens, k)?;
        let target_probs = self.verify(tokens, &draft_tokens)?;
        let verification = self.rejection_sampler.verify(
            &draft_tokens,
            &draft_probs,
            &target_probs,
            &mut self.sampler,
        )?;

        self.stats.record(k, &verification);
        debug!(
            block = self.stats.blocks,
            drafted = k,
            accepted = verification.num_accepted(),
            bonus = verification.bonus,
            "speculative block verified"
        );

        tokens.extend(verification.tokens());
        Ok(Some(verification))
    }

    /// Generates until the sequence holds `length` tokens (prompt included).
    ///
    /// Statistics restart on every call; the RNG streams carry on.
    pub fn generate(&mut self, prompt: &[u32], length: usize) -> Result<SpeculativeOutput> {
        check_prompt(prompt, self.model.vocab_size())?;
        self.stats = SpeculativeStats::default();

        let mut tokens = prompt.to_vec();
        while self.step(&mut tokens, length)?.is_some() {}

        debug!(
            blocks = self.stats.blocks,
            acceptance_rate = self.stats.acceptance_rate(),
            tokens_per_block = self.stats.tokens_per_block(),
            "speculative decoding finished"
        );

        Ok(SpeculativeOutput {
            tokens,
            avg_accepted: self.stats.avg_accepted(),
            stats: self.stats.clone(),
        })
    }

    /// Statistics accumulated so far.
    pub fn stats(&self) -> &SpeculativeStats {
        &self.stats
    }

    /// Get the speculative configuration.
    pub fn config(&self) -> &SpeculativeConfig {
        &self.config
    }
}

/// Speculative decoding with the model's own early-exit head as drafter.
///
/// Returns the prompt followed by the continuation, plus the average number
/// of accepted draft tokens per block.
pub fn speculative_decode<M: EarlyExitLm + ?Sized>(
    model: &M,
    prompt: &[u32],
    length: usize,
    gamma: usize,
    sampling_config: &SamplingConfig,
) -> Result<SpeculativeOutput> {
    let config = SpeculativeConfig::new(gamma).sampling(sampling_config.clone());
    SpeculativeDecoder::new(model, config)?.generate(prompt, length)
}
