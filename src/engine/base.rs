//! Baseline autoregressive decoding with the full-depth head.

use tracing::debug;

use super::sampler::Sampler;
use crate::config::SamplingConfig;
use crate::error::{Error, Result};
use crate::model::{last_logits, sequence_tensor, EarlyExitLm};

/// Rejects empty prompts and out-of-vocabulary ids.
pub(crate) fn check_prompt(prompt: &[u32], vocab_size: usize) -> Result<()> {
    if prompt.is_empty() {
        return Err(Error::EmptyPrompt);
    }
    if let Some(&token) = prompt.iter().find(|&&t| t as usize >= vocab_size) {
        return Err(Error::TokenOutOfRange { token, vocab_size });
    }
    Ok(())
}

/// Generates until the sequence holds `length` tokens (prompt included).
///
/// Each step runs the full model over the whole sequence and samples the
/// next token from the last position. Returns the prompt followed by the
/// continuation; a prompt already at `length` comes back unchanged.
pub fn base_decode<M: EarlyExitLm + ?Sized>(
    model: &M,
    prompt: &[u32],
    length: usize,
    sampling_config: &SamplingConfig,
) -> Result<Vec<u32>> {
    let mut sampler = Sampler::new(sampling_config)?;
    base_decode_with(model, prompt, length, &mut sampler)
}

/// [`base_decode`] with a caller-owned sampler.
pub fn base_decode_with<M: EarlyExitLm + ?Sized>(
    model: &M,
    prompt: &[u32],
    length: usize,
    sampler: &mut Sampler,
) -> Result<Vec<u32>> {
    check_prompt(prompt, model.vocab_size())?;

    let mut tokens = prompt.to_vec();
    while tokens.len() < length {
        let input_ids = sequence_tensor(&tokens, model.device())?;
        let logits = model.forward_full(&input_ids)?;
        let token = sampler.sample(&last_logits(&logits)?)?;
        tokens.push(token);
    }

    debug!(
        prompt_len = prompt.len(),
        generated = tokens.len().saturating_sub(prompt.len()),
        "base decoding finished"
    );
    Ok(tokens)
}
