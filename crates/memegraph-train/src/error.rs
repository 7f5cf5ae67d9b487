use thiserror::Error;

/// Errors that can occur while training or evaluating.
#[derive(Error, Debug)]
pub enum Error {
    /// Graph construction or model error.
    #[error(transparent)]
    Nn(#[from] memegraph_nn::Error),
    /// Candle tensor error outside a model call.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// Configuration rejected by validation.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    /// Malformed dataset record.
    #[error("invalid data at {location}: {reason}")]
    InvalidData { location: String, reason: String },
    /// Checkpoint contents do not match the model being restored.
    #[error("checkpoint mismatch: {0}")]
    Checkpoint(String),
}

/// Result type alias for memegraph-train.
pub type Result<T> = std::result::Result<T, Error>;
