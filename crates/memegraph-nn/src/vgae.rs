//! Variational graph autoencoder (Kipf & Welling, 2016).
//!
//! The encoder maps each node to a Gaussian `N(mu, exp(logstd)^2)` with two
//! GCN heads sharing a first layer. The decoder scores an edge by the inner
//! product of its endpoint latents:
//!
//! ```text
//! p(i -> j) = sigmoid(z_i . z_j)
//! ```
//!
//! Training minimises edge reconstruction plus a KL term towards `N(0, I)`.
//! The loss helpers mirror `torch_geometric.nn.VGAE`: the `EPS` floor inside
//! the logarithms and the `MAX_LOGSTD` clamp are the same constants.
//!
//! # Reference
//!
//! Kipf & Welling, "Variational Graph Auto-Encoders", NIPS Workshop 2016.

use candle_core::Tensor;
use candle_nn::{ops, VarBuilder};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::conv::GCNConv;
use crate::graph::{gcn_norm, EdgeIndex};
use crate::Result;

/// Floor inside `log` for the reconstruction terms.
pub const EPS: f64 = 1e-15;

/// Upper clamp on the encoder's log standard deviation.
pub const MAX_LOGSTD: f32 = 10.0;

/// GCN encoder producing `mu` and `logstd` per node.
pub struct GcnEncoder {
    conv1: GCNConv,
    conv_mu: GCNConv,
    conv_logstd: GCNConv,
}

impl GcnEncoder {
    pub fn new(
        in_features: usize,
        hidden: usize,
        latent: usize,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        Ok(Self {
            conv1: GCNConv::new(in_features, hidden, vb.pp("conv1"))?,
            conv_mu: GCNConv::new(hidden, latent, vb.pp("conv_mu"))?,
            conv_logstd: GCNConv::new(hidden, latent, vb.pp("conv_logstd"))?,
        })
    }

    /// Returns `(mu, logstd)`, each `(N, latent)`.
    pub fn forward(&self, x: &Tensor, adj: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let h = self.conv1.forward(x, adj)?.relu()?;
        let mu = self.conv_mu.forward(&h, adj)?;
        let logstd = self.conv_logstd.forward(&h, adj)?.minimum(MAX_LOGSTD)?;
        Ok((mu, logstd))
    }
}

/// Latent codes and the distribution they were drawn from.
#[derive(Debug, Clone)]
pub struct VgaeEncoding {
    /// Latent node codes `(N, latent)`.
    pub z: Tensor,
    pub mu: Tensor,
    pub logstd: Tensor,
}

/// GCN encoder + inner-product decoder.
pub struct DeepVgae {
    encoder: GcnEncoder,
}

impl DeepVgae {
    pub fn new(encoder: GcnEncoder) -> Self {
        Self { encoder }
    }

    /// Deterministic encoding: `z = mu`.
    pub fn encode(&self, x: &Tensor, edge_index: &EdgeIndex) -> Result<VgaeEncoding> {
        let adj = gcn_norm(edge_index, x.dims2()?.0, x.device())?;
        let (mu, logstd) = self.encoder.forward(x, &adj)?;
        Ok(VgaeEncoding {
            z: mu.clone(),
            mu,
            logstd,
        })
    }

    /// Reparameterised encoding: `z = mu + eps * exp(logstd)`, `eps ~ N(0, I)`.
    ///
    /// Noise is drawn on the host from `rng` so runs are reproducible for a
    /// given seed on every device.
    pub fn encode_train<R: Rng>(
        &self,
        x: &Tensor,
        edge_index: &EdgeIndex,
        rng: &mut R,
    ) -> Result<VgaeEncoding> {
        let VgaeEncoding { mu, logstd, .. } = self.encode(x, edge_index)?;
        let (n, d) = mu.dims2()?;
        let noise: Vec<f32> = (0..n * d).map(|_| rng.sample(StandardNormal)).collect();
        let noise = Tensor::from_vec(noise, (n, d), mu.device())?.to_dtype(mu.dtype())?;
        let z = (&mu + noise.mul(&logstd.exp()?)?)?;
        Ok(VgaeEncoding { z, mu, logstd })
    }

    /// Inner-product edge scores `(E,)`; probabilities when `sigmoid` is set.
    pub fn decode(&self, z: &Tensor, edge_index: &EdgeIndex, sigmoid: bool) -> Result<Tensor> {
        let src = z.index_select(&edge_index.sources(z.device())?, 0)?;
        let dst = z.index_select(&edge_index.targets(z.device())?, 0)?;
        let logits = src.mul(&dst)?.sum(1)?;
        if sigmoid {
            Ok(ops::sigmoid(&logits)?)
        } else {
            Ok(logits)
        }
    }

    /// Binary cross-entropy over positive edges and sampled negative edges.
    ///
    /// The negative term is dropped when `neg_edge_index` is empty, which
    /// happens when the graph is complete.
    pub fn recon_loss(
        &self,
        z: &Tensor,
        pos_edge_index: &EdgeIndex,
        neg_edge_index: &EdgeIndex,
    ) -> Result<Tensor> {
        let pos = self.decode(z, pos_edge_index, true)?;
        let pos_loss = (pos + EPS)?.log()?.mean_all()?.neg()?;
        if neg_edge_index.is_empty() {
            return Ok(pos_loss);
        }
        let neg = self.decode(z, neg_edge_index, true)?;
        let neg_loss = (neg.affine(-1.0, 1.0)? + EPS)?.log()?.mean_all()?.neg()?;
        Ok((pos_loss + neg_loss)?)
    }

    /// KL divergence to the standard normal prior, summed over latent
    /// dimensions and averaged over nodes.
    pub fn kl_loss(&self, encoding: &VgaeEncoding) -> Result<Tensor> {
        let VgaeEncoding { mu, logstd, .. } = encoding;
        let inner = ((logstd.affine(2.0, 1.0)? - mu.sqr()?)? - logstd.exp()?.sqr()?)?;
        Ok((inner.sum(1)?.mean_all()? * -0.5)?)
    }
}
