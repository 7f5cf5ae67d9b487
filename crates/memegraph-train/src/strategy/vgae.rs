use candle_core::Device;
use memegraph_nn::{DeepVgae, GcnEncoder, GraphBatch};
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;
use tracing::debug;

use super::{StepOutput, TrainingStrategy};
use crate::bundle::{Embeddings, ModelBundle};
use crate::config::{TrainerConfig, TrainerKind};
use crate::data::MemeBatch;
use crate::error::Result;
use crate::metrics::{EvalMetrics, LinkPredictionMetrics, RunningMetrics};
use crate::sampling::negative_sampling;
use crate::subgraph::{build_vgae_subgraph, ConnectivityRule};

/// Self-supervised link prediction with a variational graph autoencoder.
///
/// Training minimises `recon + kl / num_nodes` on each batch graph.
/// Evaluation scores the true edges against as many sampled non-edges.
pub struct VgaeStrategy {
    rule: ConnectivityRule,
    /// Drives both negative sampling and reparameterisation noise.
    rng: XorShiftRng,
}

impl VgaeStrategy {
    pub fn new(rule: ConnectivityRule, seed: u64) -> Self {
        Self {
            rule,
            rng: XorShiftRng::seed_from_u64(seed),
        }
    }

    pub fn from_config(config: &TrainerConfig) -> Self {
        Self::new(config.connectivity, config.seed)
    }

    pub fn rule(&self) -> ConnectivityRule {
        self.rule
    }

    fn graph(&self, emb: &Embeddings, batch: &MemeBatch) -> Result<GraphBatch> {
        let labels = batch.labels_vec()?;
        build_vgae_subgraph(&emb.image, &emb.image_features, &emb.text, &labels, self.rule)
    }
}

impl TrainingStrategy for VgaeStrategy {
    type Graph = DeepVgae;
    type Accumulator = LinkPredictionMetrics;

    fn kind(&self) -> TrainerKind {
        TrainerKind::Vgae
    }

    fn build_models(&self, config: &TrainerConfig, device: &Device) -> Result<ModelBundle<DeepVgae>> {
        let dims = &config.dims;
        ModelBundle::new(dims, config.dropout, device, |vb| {
            GcnEncoder::new(dims.projection, dims.vgae_hidden, dims.vgae_latent, vb).map(DeepVgae::new)
        })
    }

    fn forward_and_loss(
        &mut self,
        models: &ModelBundle<DeepVgae>,
        batch: &MemeBatch,
        train: bool,
    ) -> Result<StepOutput> {
        let emb = models.embed(batch, train)?;
        let graph = self.graph(&emb, batch)?;
        let vgae = models.graph.module();

        let encoding = if train {
            vgae.encode_train(&graph.x, &graph.edge_index, &mut self.rng)?
        } else {
            vgae.encode(&graph.x, &graph.edge_index)?
        };
        let num_nodes = graph.num_nodes();
        let neg = negative_sampling(&graph.edge_index, num_nodes, graph.edge_index.len(), &mut self.rng);

        let recon = vgae.recon_loss(&encoding.z, &graph.edge_index, &neg)?;
        let kl = vgae.kl_loss(&encoding)?;
        let loss = (recon + (kl * (1.0 / num_nodes as f64))?)?;
        debug!(nodes = num_nodes, pos = graph.edge_index.len(), neg = neg.len(), "vgae batch");

        Ok(StepOutput {
            loss,
            predictions: None,
            batch_size: graph.num_graphs,
        })
    }

    fn evaluate_batch(
        &mut self,
        models: &ModelBundle<DeepVgae>,
        batch: &MemeBatch,
        acc: &mut LinkPredictionMetrics,
    ) -> Result<()> {
        let emb = models.embed(batch, false)?;
        let graph = self.graph(&emb, batch)?;
        let vgae = models.graph.module();

        let z = vgae.encode(&graph.x, &graph.edge_index)?.z;
        let pos = &graph.edge_index;
        let neg = negative_sampling(pos, graph.num_nodes(), pos.len(), &mut self.rng);

        let mut scores = vgae.decode(&z, pos, true)?.to_vec1::<f32>()?;
        if !neg.is_empty() {
            scores.extend(vgae.decode(&z, &neg, true)?.to_vec1::<f32>()?);
        }
        let mut labels = vec![1u8; pos.len()];
        labels.resize(pos.len() + neg.len(), 0);

        acc.record(&labels, &scores);
        Ok(())
    }

    fn train_summary(&self, epoch: usize, metrics: &RunningMetrics) -> String {
        format!("Training --- Epoch : {epoch} | Loss : {}", metrics.mean_loss())
    }

    fn eval_summary(&self, split: &str, epoch: usize, metrics: &EvalMetrics) -> String {
        let get = |k: &str| metrics.get(k).unwrap_or(f64::NAN);
        format!(
            "{split} --- Epoch : {epoch} | roc_auc_score : {} | average_precision_score : {}",
            get("auc"),
            get("avg_precision")
        )
    }
}
