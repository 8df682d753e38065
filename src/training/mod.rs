//! Dual-loss training for the early-exit transformer.

pub mod data;
pub mod objective;
pub mod session;

pub use data::{decode_tokens, ByteCorpus, TextSampler, DEFAULT_TRAIN_FRACTION};
pub use objective::TrainingObjective;
pub use session::{clip_grad_norm, grad_norm, EvalMetrics, StepMetrics, TrainingSession};
