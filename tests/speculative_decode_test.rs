//! End-to-end tests for speculative decoding against base decoding.

mod common;

use candle_core::Device;
use common::{logit_table, softmax, BigramLm};
use early_exit_spec::speculative::SpeculativeDecoder;
use early_exit_spec::{
    base_decode, speculative_decode, EarlyExitTransformer, Error, ModelConfig, SamplingConfig,
    SamplingStrategy, SpeculativeConfig,
};

fn temperature(seed: u64) -> SamplingConfig {
    SamplingConfig::new(SamplingStrategy::Temperature { temperature: 1.0 }).seed(seed)
}

#[test]
fn test_matches_base_decoding_when_heads_agree() {
    let model = BigramLm::shared(logit_table(8, 1));
    let prompt = [3, 1, 4];

    for seed in 0..20 {
        let config = temperature(seed);
        let base = base_decode(&model, &prompt, 6, &config).unwrap();
        let spec = speculative_decode(&model, &prompt, 6, 2, &config).unwrap();

        assert_eq!(spec.tokens, base, "seed {seed}");
        assert_eq!(spec.tokens.len(), 6);
        assert_eq!(&spec.tokens[..3], &prompt);
        // q = p accepts every draft.
        assert_eq!(spec.stats.accepted, spec.stats.drafted);
    }
}

#[test]
fn test_output_distribution_matches_target() {
    // Draft head deliberately disagrees with the target head.
    let full = logit_table(4, 2);
    let exit = logit_table(4, 9);
    let model = BigramLm::new(full.clone(), exit);

    let prompt = [0u32];
    let length = 3;
    let trials = 4000;

    let mut counts = [[0usize; 4]; 4];
    for seed in 0..trials {
        let out = speculative_decode(&model, &prompt, length, 2, &temperature(seed)).unwrap();
        counts[out.tokens[1] as usize][out.tokens[2] as usize] += 1;
    }

    let first = softmax(&full[0]);
    for a in 0..4 {
        let second = softmax(&full[a]);
        for b in 0..4 {
            let expected = first[a] * second[b];
            let observed = counts[a][b] as f32 / trials as f32;
            assert!(
                (observed - expected).abs() < 0.03,
                "P({a},{b}): observed {observed:.4}, expected {expected:.4}"
            );
        }
    }
}

#[test]
fn test_multi_draft_blocks_match_target() {
    // Three tokens to generate with gamma 3: the first block drafts two, so an
    // accepted draft can be followed by a rejection and residual resample
    // inside the same block.
    let full = logit_table(4, 2);
    let exit = logit_table(4, 9);
    let model = BigramLm::new(full.clone(), exit);

    let trials = 20000;
    let mut counts = vec![0usize; 64];
    let mut mid_block_rejections = 0;
    for seed in 0..trials {
        let config = SpeculativeConfig::new(3).sampling(temperature(seed));
        let mut decoder = SpeculativeDecoder::new(&model, config).unwrap();
        let mut tokens = vec![0u32];
        let first = decoder.step(&mut tokens, 4).unwrap().unwrap();
        assert_eq!(decoder.stats().drafted, 2);
        if first.num_accepted() > 0 && !first.bonus {
            mid_block_rejections += 1;
        }
        while decoder.step(&mut tokens, 4).unwrap().is_some() {}
        assert!(decoder.stats().drafted <= 3);

        let (a, b, c) = (tokens[1] as usize, tokens[2] as usize, tokens[3] as usize);
        counts[a * 16 + b * 4 + c] += 1;
    }

    assert!(mid_block_rejections > 0);

    let first = softmax(&full[0]);
    for a in 0..4 {
        let second = softmax(&full[a]);
        for b in 0..4 {
            let third = softmax(&full[b]);
            for c in 0..4 {
                let expected = first[a] * second[b] * third[c];
                let observed = counts[a * 16 + b * 4 + c] as f32 / trials as f32;
                assert!(
                    (observed - expected).abs() < 0.015,
                    "P({a},{b},{c}): observed {observed:.4}, expected {expected:.4}"
                );
            }
        }
    }
}

#[test]
fn test_step_rejects_empty_sequence() {
    let model = BigramLm::shared(logit_table(8, 1));
    let mut decoder = SpeculativeDecoder::new(&model, SpeculativeConfig::new(2)).unwrap();

    let mut tokens = Vec::new();
    assert!(matches!(
        decoder.step(&mut tokens, 1),
        Err(Error::EmptyPrompt)
    ));
    assert!(tokens.is_empty());
}

#[test]
fn test_stats_restart_per_generate() {
    let model = BigramLm::new(logit_table(8, 3), logit_table(8, 4));
    let config = SpeculativeConfig::new(2).sampling(temperature(5));
    let mut decoder = SpeculativeDecoder::new(&model, config).unwrap();

    let first = decoder.generate(&[1], 30).unwrap();
    assert!(first.stats.blocks > 1);

    // One remaining token: a single zero-draft block.
    let second = decoder.generate(&[1], 2).unwrap();
    assert_eq!(second.stats.blocks, 1);
    assert_eq!(second.stats.drafted, 0);
    assert_eq!(decoder.stats(), &second.stats);
}

#[test]
fn test_block_truncated_at_length() {
    let model = BigramLm::new(logit_table(8, 3), logit_table(8, 4));
    let prompt = [1, 2, 3];

    for seed in 0..20 {
        let out = speculative_decode(&model, &prompt, 5, 5, &temperature(seed)).unwrap();
        assert_eq!(out.tokens.len(), 5);
        assert!(out.stats.drafted <= 1);
        assert!(out.avg_accepted <= 5.0);
    }
}

#[test]
fn test_acceptance_count_bounded_by_gamma() {
    let model = BigramLm::new(logit_table(8, 5), logit_table(8, 6));
    let gamma = 3;
    let config = SpeculativeConfig::new(gamma).sampling(temperature(17));
    let mut decoder = SpeculativeDecoder::new(&model, config).unwrap();

    let mut tokens = vec![0u32];
    while let Some(verification) = decoder.step(&mut tokens, 40).unwrap() {
        assert!(verification.num_accepted() <= gamma);
        assert!(verification.acceptance_mask.len() <= gamma);
        if verification.num_accepted() == verification.acceptance_mask.len() {
            assert!(verification.bonus);
        }
    }
    assert_eq!(tokens.len(), 40);

    let stats = decoder.stats();
    assert!(stats.accepted <= stats.drafted);
    assert_eq!(stats.bonus_tokens + stats.resampled, stats.blocks);
}

#[test]
fn test_prompt_at_length_returned_unchanged() {
    let model = BigramLm::shared(logit_table(8, 1));
    let prompt = [1, 2, 3, 4];

    let out = speculative_decode(&model, &prompt, 3, 2, &temperature(0)).unwrap();
    assert_eq!(out.tokens, prompt);
    assert_eq!(out.stats.blocks, 0);
    assert_eq!(out.avg_accepted, 0.0);

    let base = base_decode(&model, &prompt, 4, &temperature(0)).unwrap();
    assert_eq!(base, prompt);
}

#[test]
fn test_zero_gamma_rejected() {
    let model = BigramLm::shared(logit_table(8, 1));
    let result = speculative_decode(&model, &[1], 5, 0, &temperature(0));
    assert!(matches!(result, Err(Error::InvalidGamma(0))));
}

#[test]
fn test_empty_prompt_rejected() {
    let model = BigramLm::shared(logit_table(8, 1));
    assert!(matches!(
        speculative_decode(&model, &[], 5, 2, &temperature(0)),
        Err(Error::EmptyPrompt)
    ));
    assert!(matches!(
        base_decode(&model, &[], 5, &temperature(0)),
        Err(Error::EmptyPrompt)
    ));
}

#[test]
fn test_out_of_vocab_prompt_rejected() {
    let model = BigramLm::shared(logit_table(8, 1));
    assert!(matches!(
        speculative_decode(&model, &[8], 5, 2, &temperature(0)),
        Err(Error::TokenOutOfRange { token: 8, .. })
    ));
}

#[test]
fn test_greedy_transformer_matches_base() {
    let model = EarlyExitTransformer::new(&ModelConfig::tiny(), &Device::Cpu).unwrap();
    let prompt = [1, 5, 9];
    let config = SamplingConfig::greedy();

    let base = base_decode(&model, &prompt, 12, &config).unwrap();
    let spec = speculative_decode(&model, &prompt, 12, 3, &config).unwrap();

    assert_eq!(spec.tokens, base);
    assert!(spec.stats.blocks >= 3);
}
