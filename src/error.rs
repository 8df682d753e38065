//! Error types for early-exit training and decoding.

use thiserror::Error;

/// Result type alias for crate operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration rejected at construction or call time.
    #[error("configuration error: {0}")]
    InvalidConfig(String),

    /// A loss computation needs at least one input and one target position.
    #[error("sequence of length {len} is too short for a loss computation (need at least 2)")]
    SequenceTooShort { len: usize },

    /// Sequence exceeds the rotary position table.
    #[error("sequence of length {len} exceeds max_position_embeddings ({max})")]
    SequenceTooLong { len: usize, max: usize },

    /// Speculative decoding needs at least one draft token per block.
    #[error("gamma must be positive, got {0}")]
    InvalidGamma(usize),

    /// Decoding needs at least one prompt token to condition on.
    #[error("prompt must contain at least one token")]
    EmptyPrompt,

    /// Token id outside the model vocabulary.
    #[error("token {token} out of range for vocabulary of size {vocab_size}")]
    TokenOutOfRange { token: u32, vocab_size: usize },

    /// Probability vector could not be sampled from.
    #[error("sampling error: {0}")]
    Sampling(String),

    /// Training corpus error.
    #[error("data error: {0}")]
    Data(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create an invalid config error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
