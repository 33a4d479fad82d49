//! Error types for speedy-speech-rs.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Candle tensor/model error, including every shape mismatch raised
    /// by malformed inputs.
    #[error("candle: {0}")]
    Candle(#[from] candle_core::Error),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),

    /// Speaker argument that the model was not built to accept.
    #[error("speaker: {0}")]
    Speaker(String),

    /// Sequence longer than the positional encoding table.
    #[error("sequence length {len} exceeds positional table size {max}")]
    SequenceTooLong { len: usize, max: usize },

    /// I/O error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
