//! Generation engine.
//!
//! This module contains:
//! - Sampler shared by every decoder
//! - Base (full-depth only) autoregressive decoding
//! - Wall-clock benchmark wrapper

pub mod base;
pub mod benchmark;
pub mod sampler;

pub use base::{base_decode, base_decode_with};
pub use benchmark::{benchmark, Timed};
pub use sampler::Sampler;
