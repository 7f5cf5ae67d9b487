//! Per-model training behaviour plugged into [`crate::trainer::Trainer`].
//!
//! The trainer owns the loop, the optimizer and checkpointing. A strategy
//! owns what differs between model families: how the graph model is built,
//! how a batch becomes a loss, and how a batch is scored at evaluation time.

mod classifier;
mod vgae;

pub use classifier::ClassifierStrategy;
pub use vgae::VgaeStrategy;

use candle_core::{Device, Tensor};

use crate::bundle::ModelBundle;
use crate::config::{TrainerConfig, TrainerKind};
use crate::data::MemeBatch;
use crate::error::Result;
use crate::metrics::{EvalMetrics, LinkPredictionMetrics, RunningMetrics};

/// Loss of one batch plus what the running metrics need.
#[derive(Debug)]
pub struct StepOutput {
    /// Scalar loss, still attached to the graph.
    pub loss: Tensor,
    /// Arg-max classes, for models that predict labels.
    pub predictions: Option<Vec<u32>>,
    /// Examples in the batch.
    pub batch_size: usize,
}

impl StepOutput {
    /// Fold this batch into `metrics`.
    pub fn record(&self, metrics: &mut RunningMetrics, labels: &[u32]) -> Result<()> {
        let loss = self.loss.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?;
        match &self.predictions {
            Some(preds) => metrics.record(loss, preds, labels),
            None => metrics.record_loss(loss, self.batch_size),
        }
        Ok(())
    }
}

/// Per-epoch evaluation state.
pub trait EvalAccumulator: Default {
    fn finish(&self) -> EvalMetrics;
}

impl EvalAccumulator for RunningMetrics {
    fn finish(&self) -> EvalMetrics {
        EvalMetrics::new()
            .with("accuracy", self.accuracy())
            .with("loss", self.mean_loss())
    }
}

impl EvalAccumulator for LinkPredictionMetrics {
    fn finish(&self) -> EvalMetrics {
        LinkPredictionMetrics::finish(self)
    }
}

/// What a model family contributes to the training loop.
pub trait TrainingStrategy {
    /// Graph model held in [`ModelBundle::graph`].
    type Graph;
    /// Evaluation state, fresh for every evaluation pass.
    type Accumulator: EvalAccumulator;

    fn kind(&self) -> TrainerKind;

    /// Build the full bundle for `config` on `device`.
    fn build_models(&self, config: &TrainerConfig, device: &Device) -> Result<ModelBundle<Self::Graph>>;

    /// Forward pass and loss for one batch already on the model device.
    fn forward_and_loss(
        &mut self,
        models: &ModelBundle<Self::Graph>,
        batch: &MemeBatch,
        train: bool,
    ) -> Result<StepOutput>;

    /// Score one batch without updating parameters.
    fn evaluate_batch(
        &mut self,
        models: &ModelBundle<Self::Graph>,
        batch: &MemeBatch,
        acc: &mut Self::Accumulator,
    ) -> Result<()>;

    /// Stdout line closing a training epoch.
    fn train_summary(&self, epoch: usize, metrics: &RunningMetrics) -> String;

    /// Stdout line closing an evaluation pass.
    fn eval_summary(&self, split: &str, epoch: usize, metrics: &EvalMetrics) -> String {
        format!("{split} --- Epoch : {epoch} | {metrics}")
    }
}
