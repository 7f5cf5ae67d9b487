use candle_core::{Device, D};
use candle_nn::loss;
use memegraph_nn::GcnClassifier;
use tracing::debug;

use super::{StepOutput, TrainingStrategy};
use crate::bundle::ModelBundle;
use crate::config::{TrainerConfig, TrainerKind};
use crate::data::MemeBatch;
use crate::error::Result;
use crate::metrics::RunningMetrics;
use crate::subgraph::build_subgraph;

/// Supervised graph classification: one image/text graph per meme,
/// cross-entropy on the pooled logits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassifierStrategy;

impl ClassifierStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl TrainingStrategy for ClassifierStrategy {
    type Graph = GcnClassifier;
    type Accumulator = RunningMetrics;

    fn kind(&self) -> TrainerKind {
        TrainerKind::Gnn
    }

    fn build_models(&self, config: &TrainerConfig, device: &Device) -> Result<ModelBundle<GcnClassifier>> {
        let dims = &config.dims;
        ModelBundle::new(dims, config.dropout, device, |vb| {
            GcnClassifier::new(dims.projection, dims.gnn_hidden, dims.num_classes, config.dropout, vb)
        })
    }

    fn forward_and_loss(
        &mut self,
        models: &ModelBundle<GcnClassifier>,
        batch: &MemeBatch,
        train: bool,
    ) -> Result<StepOutput> {
        let emb = models.embed(batch, train)?;
        let graph = build_subgraph(&emb.image, &emb.text)?;
        let output = models.graph.module().forward_t(&graph, train)?;

        let logits = output.primary();
        let loss = loss::cross_entropy(logits, &batch.labels)?;
        let predictions = logits.argmax(D::Minus1)?.to_vec1::<u32>()?;
        debug!(nodes = graph.num_nodes(), edges = graph.edge_index.len(), "classifier batch");

        Ok(StepOutput {
            loss,
            batch_size: predictions.len(),
            predictions: Some(predictions),
        })
    }

    fn evaluate_batch(
        &mut self,
        models: &ModelBundle<GcnClassifier>,
        batch: &MemeBatch,
        acc: &mut RunningMetrics,
    ) -> Result<()> {
        let step = self.forward_and_loss(models, batch, false)?;
        step.record(acc, &batch.labels_vec()?)
    }

    fn train_summary(&self, epoch: usize, metrics: &RunningMetrics) -> String {
        format!(
            "Training --- Epoch : {epoch} | Accuracy : {} | Loss : {}",
            metrics.accuracy(),
            metrics.mean_loss()
        )
    }
}
