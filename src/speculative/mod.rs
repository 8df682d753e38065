//! Speculative decoding with an early-exit draft.
//!
//! ## How it works
//!
//! 1. **Draft Phase**: the early-exit head (first `early_exit_layer` layers)
//!    generates gamma tokens autoregressively.
//!
//! 2. **Verify Phase**: the full-depth head scores all gamma + 1 positions in
//!    a single forward pass.
//!
//! 3. **Rejection Sampling**: each draft token is accepted or rejected from
//!    the ratio of full-depth to early-exit probability; the first rejection
//!    is replaced by a residual resample, a fully accepted block earns a
//!    bonus token.
//!
//! ## Example
//!
//! ```text
//! Draft (gamma=4):  [prompt] -> t1 -> t2 -> t3 -> t4
//! Target verify:    [prompt, t1, t2, t3, t4] -> distributions for 5 positions
//! Rejection:        accept t1, t2, reject t3, resample -> final: t1, t2, t3'
//! ```

pub mod config;
pub mod engine;
pub mod sampler;

pub use config::SpeculativeConfig;
pub use engine::{speculative_decode, SpeculativeDecoder, SpeculativeOutput, SpeculativeStats};
pub use sampler::{acceptance_probability, residual_distribution, RejectionSampler, Verification};
