//! Graph-level classifier over fused image/text graphs.

use candle_core::Tensor;
use candle_nn::{linear, ops, Linear, Module, VarBuilder};

use crate::conv::GCNConv;
use crate::graph::GraphBatch;
use crate::Result;

/// Outputs of [`GcnClassifier::forward_t`].
#[derive(Debug, Clone)]
pub struct ClassifierOutput {
    /// Per-graph class logits `(G, num_classes)`.
    pub logits: Tensor,
    /// Node states after the last convolution `(N, hidden)`.
    pub node_embeddings: Tensor,
}

impl ClassifierOutput {
    /// The output the loss is computed on.
    pub fn primary(&self) -> &Tensor {
        &self.logits
    }
}

/// Two GCN layers, mean readout per graph, linear head.
pub struct GcnClassifier {
    conv1: GCNConv,
    conv2: GCNConv,
    head: Linear,
    dropout: f32,
    num_classes: usize,
}

impl GcnClassifier {
    pub fn new(
        in_features: usize,
        hidden: usize,
        num_classes: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> candle_core::Result<Self> {
        Ok(Self {
            conv1: GCNConv::new(in_features, hidden, vb.pp("conv1"))?,
            conv2: GCNConv::new(hidden, hidden, vb.pp("conv2"))?,
            head: linear(hidden, num_classes, vb.pp("head"))?,
            dropout,
            num_classes,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn forward_t(&self, graph: &GraphBatch, train: bool) -> Result<ClassifierOutput> {
        let adj = graph.normalized_adjacency()?;

        let mut h = self.conv1.forward(&graph.x, &adj)?.relu()?;
        if train && self.dropout > 0.0 {
            h = ops::dropout(&h, self.dropout)?;
        }
        let h = self.conv2.forward(&h, &adj)?.relu()?;

        let pooled = graph.mean_pool_matrix()?.matmul(&h)?;
        let logits = self.head.forward(&pooled)?;

        Ok(ClassifierOutput {
            logits,
            node_embeddings: h,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeIndex;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_one_logit_row_per_graph() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = GcnClassifier::new(8, 16, 2, 0.5, vb).unwrap();

        // Three examples, two nodes each.
        let x = Tensor::randn(0f32, 1f32, (6, 8), &device).unwrap();
        let mut edges = EdgeIndex::new();
        for i in 0..3 {
            edges.push_undirected(2 * i, 2 * i + 1);
        }
        let graph = GraphBatch::new(x, edges, vec![0, 0, 1, 1, 2, 2]).unwrap();

        let out = model.forward_t(&graph, true).unwrap();
        assert_eq!(out.primary().dims(), &[3, 2]);
        assert_eq!(out.node_embeddings.dims(), &[6, 16]);
    }
}
