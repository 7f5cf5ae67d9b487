//! The epoch loop shared by every model family.
//!
//! ```text
//! for epoch in 0..epochs:
//!     train_epoch      forward, loss, backward, step; print summary
//!     evaluate (dev)   no updates, dropout off; print summary
//!     maybe_checkpoint save if the monitored metric improved
//! ```
//!
//! Model-specific work is delegated to a [`TrainingStrategy`].

use std::path::Path;

use tracing::{debug, info};

use crate::bundle::ModelBundle;
use crate::checkpoint::{CheckpointOutcome, CheckpointPolicy};
use crate::config::TrainerConfig;
use crate::data::BatchSource;
use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::metrics::{EvalMetrics, RunningMetrics};
use crate::optim::GraphOptimizer;
use crate::strategy::{ClassifierStrategy, EvalAccumulator, TrainingStrategy, VgaeStrategy};

/// Supervised GCN classifier trainer.
pub type GnnTrainer = Trainer<ClassifierStrategy>;
/// Variational graph autoencoder trainer.
pub type VgaeTrainer = Trainer<VgaeStrategy>;

/// Everything [`Trainer::fit`] observed, one entry per epoch.
#[derive(Debug, Default)]
pub struct FitReport {
    pub train: Vec<RunningMetrics>,
    pub eval: Vec<EvalMetrics>,
    pub checkpoints: Vec<CheckpointOutcome>,
}

impl FitReport {
    /// Mean training loss per epoch.
    pub fn losses(&self) -> Vec<f64> {
        self.train.iter().map(RunningMetrics::mean_loss).collect()
    }

    pub fn saved(&self) -> impl Iterator<Item = &Path> {
        self.checkpoints.iter().filter_map(CheckpointOutcome::saved_path)
    }
}

/// Owns the models, optimizer and checkpoint policy for one run.
pub struct Trainer<S: TrainingStrategy> {
    config: TrainerConfig,
    device: DeviceInfo,
    strategy: S,
    models: ModelBundle<S::Graph>,
    optimizer: GraphOptimizer,
    checkpoints: CheckpointPolicy,
}

impl<S: TrainingStrategy> Trainer<S> {
    /// Validate `config` and build the strategy's models on `device`.
    pub fn new(config: TrainerConfig, device: DeviceInfo, strategy: S) -> Result<Self> {
        config.validate()?;
        let models = strategy.build_models(&config, &device.device)?;
        Self::with_models(config, device, strategy, models)
    }

    /// Use a prebuilt bundle, e.g. one with custom encoders.
    pub fn with_models(
        config: TrainerConfig,
        device: DeviceInfo,
        strategy: S,
        mut models: ModelBundle<S::Graph>,
    ) -> Result<Self> {
        config.validate()?;
        if config.trainer != strategy.kind() {
            return Err(Error::InvalidConfig(format!(
                "config asks for {:?} but the strategy trains {:?}",
                config.trainer,
                strategy.kind()
            )));
        }
        models.set_freeze_encoders(config.freeze_encoders);

        let vars = models.trainable_vars()?;
        info!(
            trainer = ?strategy.kind(),
            params = vars.len(),
            optimizer = config.optimizer.kind.as_str(),
            frozen_encoders = config.freeze_encoders,
            "built models"
        );
        let optimizer = GraphOptimizer::new(vars, config.optimizer.clone());
        let checkpoints = CheckpointPolicy::new(
            &config.checkpoint_dir,
            &config.model_name,
            strategy.kind().monitored_metric(),
        );

        Ok(Self {
            config,
            device,
            strategy,
            models,
            optimizer,
            checkpoints,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn models(&self) -> &ModelBundle<S::Graph> {
        &self.models
    }

    pub fn optimizer(&self) -> &GraphOptimizer {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut GraphOptimizer {
        &mut self.optimizer
    }

    pub fn checkpoint_policy(&self) -> &CheckpointPolicy {
        &self.checkpoints
    }

    /// One pass over `source` with parameter updates.
    pub fn train_epoch(&mut self, epoch: usize, source: &mut dyn BatchSource) -> Result<RunningMetrics> {
        let mut metrics = RunningMetrics::default();
        for (i, batch) in source.batches().enumerate() {
            let batch = batch?.to_device(&self.device.device)?;
            let labels = batch.labels_vec()?;

            let step = self.strategy.forward_and_loss(&self.models, &batch, true)?;
            self.optimizer.backward_step(&step.loss)?;
            step.record(&mut metrics, &labels)?;
            debug!(epoch, batch = i, seen = metrics.total, "train step");
        }

        println!("{}", self.strategy.train_summary(epoch, &metrics));
        Ok(metrics)
    }

    /// Score `source` without updating parameters.
    pub fn evaluate(&mut self, epoch: usize, split: &str, source: &mut dyn BatchSource) -> Result<EvalMetrics> {
        let mut acc = S::Accumulator::default();
        for batch in source.batches() {
            let batch = batch?.to_device(&self.device.device)?;
            self.strategy.evaluate_batch(&self.models, &batch, &mut acc)?;
        }

        let metrics = acc.finish();
        println!("{}", self.strategy.eval_summary(split, epoch, &metrics));
        Ok(metrics)
    }

    /// Save models and optimizer if `metrics` beat the best so far.
    pub fn maybe_checkpoint(&mut self, epoch: usize, metrics: &EvalMetrics) -> CheckpointOutcome {
        self.checkpoints
            .maybe_checkpoint(epoch, metrics, &self.models, &self.optimizer)
    }

    /// Train for `config.epochs`, evaluating and checkpointing on `dev` after
    /// every epoch when it is given.
    pub fn fit(
        &mut self,
        train: &mut dyn BatchSource,
        mut dev: Option<&mut dyn BatchSource>,
    ) -> Result<FitReport> {
        let mut report = FitReport::default();
        for epoch in 0..self.config.epochs {
            report.train.push(self.train_epoch(epoch, train)?);
            if let Some(dev) = dev.as_deref_mut() {
                let metrics = self.evaluate(epoch, "Validation", dev)?;
                report.checkpoints.push(self.maybe_checkpoint(epoch, &metrics));
                report.eval.push(metrics);
            }
        }
        Ok(report)
    }

    /// Restore models and, when present, optimizer state from a checkpoint
    /// directory.
    pub fn resume(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        self.models.load_from(dir)?;
        let optim_path = dir.join(format!("{}.safetensors", self.optimizer.kind().as_str()));
        if optim_path.exists() {
            self.optimizer.load(&optim_path)?;
        }
        info!(
            path = %dir.display(),
            optimizer_steps = self.optimizer.steps(),
            "resumed from checkpoint"
        );
        Ok(())
    }
}

impl GnnTrainer {
    /// Classifier trainer from config alone.
    pub fn from_config(config: TrainerConfig, device: DeviceInfo) -> Result<Self> {
        Self::new(config, device, ClassifierStrategy::new())
    }
}

impl VgaeTrainer {
    /// VGAE trainer seeded and wired from config.
    pub fn from_config(config: TrainerConfig, device: DeviceInfo) -> Result<Self> {
        let strategy = VgaeStrategy::from_config(&config);
        Self::new(config, device, strategy)
    }
}
