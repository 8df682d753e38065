//! Shared test fixtures.

#![allow(dead_code)]

use candle_core::{Device, Tensor};
use early_exit_spec::{EarlyExitLm, Result};

/// Bigram model: the logits at each position depend only on the token there.
///
/// `full` and `exit` are `[vocab][vocab]` logit tables for the two heads.
pub struct BigramLm {
    full: Vec<Vec<f32>>,
    exit: Vec<Vec<f32>>,
    device: Device,
}

impl BigramLm {
    pub fn new(full: Vec<Vec<f32>>, exit: Vec<Vec<f32>>) -> Self {
        Self {
            full,
            exit,
            device: Device::Cpu,
        }
    }

    /// Both heads share one table, so draft and target distributions match.
    pub fn shared(table: Vec<Vec<f32>>) -> Self {
        Self::new(table.clone(), table)
    }

    fn lookup(&self, table: &[Vec<f32>], input_ids: &Tensor) -> Result<Tensor> {
        let ids = input_ids.to_vec2::<u32>()?;
        let (batch, seq_len) = (ids.len(), ids[0].len());
        let vocab = table.len();
        let flat: Vec<f32> = ids
            .iter()
            .flatten()
            .flat_map(|&t| table[t as usize].iter().copied())
            .collect();
        Ok(Tensor::from_vec(flat, (batch, seq_len, vocab), &self.device)?)
    }
}

impl EarlyExitLm for BigramLm {
    fn device(&self) -> &Device {
        &self.device
    }

    fn vocab_size(&self) -> usize {
        self.full.len()
    }

    fn forward_full(&self, input_ids: &Tensor) -> Result<Tensor> {
        self.lookup(&self.full, input_ids)
    }

    fn forward_early_exit(&self, input_ids: &Tensor) -> Result<Tensor> {
        self.lookup(&self.exit, input_ids)
    }
}

/// Deterministic pseudo-random logit table.
pub fn logit_table(vocab: usize, salt: u32) -> Vec<Vec<f32>> {
    (0..vocab)
        .map(|row| {
            (0..vocab)
                .map(|col| {
                    let h = (row as u32 * 31 + col as u32 * 17 + salt * 7) % 11;
                    h as f32 * 0.3 - 1.5
                })
                .collect()
        })
        .collect()
}

/// Softmax of a logit row.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}
