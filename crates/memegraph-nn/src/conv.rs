//! Message-passing convolution.
//!
//! [`GCNConv`] follows the message-passing paradigm:
//!
//! 1. **Message**: transform neighbor features with a shared weight
//! 2. **Aggregate**: normalised sum over neighbors (self-loop included)
//! 3. **Update**: the aggregated value is the new node state
//!
//! ```text
//! h_i^{(l+1)} = sum_{j in N(i) + {i}} h_j^{(l)} W / sqrt(d_i d_j)
//! ```

use candle_core::{Result, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};

/// Graph Convolutional Network layer.
///
/// Implements: H' = D^{-1/2} (A + I) D^{-1/2} H W
///
/// # Reference
///
/// Kipf & Welling, "Semi-Supervised Classification with Graph Convolutional
/// Networks", ICLR 2017.
pub struct GCNConv {
    linear: Linear,
}

impl GCNConv {
    /// Create a new GCN layer.
    ///
    /// # Arguments
    /// - `in_features`: Input feature dimension
    /// - `out_features`: Output feature dimension
    /// - `vb`: Variable builder for parameter initialization
    pub fn new(in_features: usize, out_features: usize, vb: VarBuilder) -> Result<Self> {
        let linear = linear(in_features, out_features, vb)?;
        Ok(Self { linear })
    }

    /// Forward pass with a precomputed propagation matrix.
    ///
    /// # Arguments
    /// - `x`: Node features (N x in_features)
    /// - `adj`: Normalized adjacency (N x N) from [`crate::graph::gcn_norm`]
    ///
    /// # Returns
    /// - Node embeddings (N x out_features)
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> Result<Tensor> {
        let h = self.linear.forward(x)?;
        adj.matmul(&h)
    }
}
