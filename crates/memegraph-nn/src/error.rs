//! Error types for memegraph-nn.

use thiserror::Error;

/// Tensor-level error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error (shape, dtype or device placement).
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch in {context}: expected {expected}, got {got}")]
    DimensionMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// An edge endpoint addresses a node that does not exist.
    #[error("edge ({src}, {dst}) out of bounds for graph with {num_nodes} nodes")]
    EdgeOutOfBounds {
        src: usize,
        dst: usize,
        num_nodes: usize,
    },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
