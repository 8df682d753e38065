//! early-exit-spec: early-exit transformer training and same-model
//! speculative decoding in Rust.
//!
//! One transformer carries two prediction heads over a single parameter set:
//! - A full-depth head after the last layer
//! - An early-exit head reading the residual stream at a shallower layer
//!
//! Training optimizes both heads jointly. At inference time the early-exit
//! head drafts blocks of tokens that the full-depth head verifies in a single
//! pass, with rejection sampling keeping the output distribution identical to
//! plain full-depth decoding.

pub mod config;
pub mod error;

pub mod engine;
pub mod model;
pub mod speculative;
pub mod training;

pub use config::{ModelConfig, SamplingConfig, SamplingStrategy, TrainingConfig};
pub use engine::{base_decode, benchmark, Sampler, Timed};
pub use error::{Error, Result};
pub use model::{EarlyExitLm, EarlyExitOutput, EarlyExitTransformer};
pub use speculative::{speculative_decode, SpeculativeConfig, SpeculativeDecoder, SpeculativeOutput};
pub use training::{decode_tokens, TextSampler, TrainingObjective, TrainingSession};
