//! Best-metric checkpointing.
//!
//! After each evaluation the trainer asks the [`CheckpointPolicy`] whether
//! the monitored metric improved. An improvement writes a new directory:
//!
//! ```text
//! <checkpoint_dir>/<model_name>/<metric values joined by "_">/
//!     image_encoder.safetensors
//!     ...
//!     graph.safetensors
//!     <optimizer>.safetensors
//!     metrics.json
//! ```
//!
//! Write failures never stop training. They come back as
//! [`CheckpointOutcome::Failed`] and the best value stays where it was.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::bundle::ModelBundle;
use crate::error::{Error, Result};
use crate::metrics::EvalMetrics;
use crate::optim::GraphOptimizer;

/// Why no checkpoint was written.
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// The monitored value did not beat the best so far (NaN never does).
    NotImproved { best: f64, current: f64 },
    /// A checkpoint with the same metric tag is already on disk.
    AlreadyExists(PathBuf),
    /// The evaluation did not report the monitored metric.
    MissingMetric(&'static str),
}

/// Result of one checkpoint decision.
#[derive(Debug)]
pub enum CheckpointOutcome {
    Saved(PathBuf),
    Skipped(SkipReason),
    Failed(Error),
}

impl CheckpointOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, CheckpointOutcome::Saved(_))
    }

    pub fn saved_path(&self) -> Option<&Path> {
        match self {
            CheckpointOutcome::Saved(p) => Some(p),
            _ => None,
        }
    }
}

/// Tracks the best monitored value and writes checkpoints that beat it.
#[derive(Debug, Clone)]
pub struct CheckpointPolicy {
    root: PathBuf,
    monitor: &'static str,
    best: f64,
}

impl CheckpointPolicy {
    /// Checkpoints go under `<checkpoint_dir>/<model_name>`.
    pub fn new(checkpoint_dir: impl AsRef<Path>, model_name: &str, monitor: &'static str) -> Self {
        Self {
            root: checkpoint_dir.as_ref().join(model_name),
            monitor,
            best: f64::NEG_INFINITY,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn monitor(&self) -> &'static str {
        self.monitor
    }

    /// Best value saved so far; `-inf` before the first save.
    pub fn best(&self) -> f64 {
        self.best
    }

    /// Decide whether `metrics` improve on the best value and, if so, save.
    pub fn maybe_checkpoint<G>(
        &mut self,
        epoch: usize,
        metrics: &EvalMetrics,
        models: &ModelBundle<G>,
        optimizer: &GraphOptimizer,
    ) -> CheckpointOutcome {
        let current = match metrics.get(self.monitor) {
            Some(v) => v,
            None => return CheckpointOutcome::Skipped(SkipReason::MissingMetric(self.monitor)),
        };
        // NaN compares false here.
        if !(current > self.best) {
            return CheckpointOutcome::Skipped(SkipReason::NotImproved {
                best: self.best,
                current,
            });
        }

        let dir = self.root.join(metrics.tag());
        if dir.exists() {
            return CheckpointOutcome::Skipped(SkipReason::AlreadyExists(dir));
        }

        info!(epoch, path = %dir.display(), "saving checkpoint");
        match write_checkpoint(&dir, metrics, models, optimizer) {
            Ok(()) => {
                self.best = current;
                info!(epoch, metric = self.monitor, best = current, "new best checkpoint");
                CheckpointOutcome::Saved(dir)
            }
            Err(e) => {
                error!(epoch, path = %dir.display(), error = %e, "checkpoint failed");
                // A partial directory would shadow a later retry at the same tag.
                if let Err(cleanup) = remove_partial(&dir) {
                    warn!(path = %dir.display(), error = %cleanup, "could not remove partial checkpoint");
                }
                CheckpointOutcome::Failed(e)
            }
        }
    }
}

/// Remove a half-written checkpoint directory; a missing one is fine.
fn remove_partial(dir: &Path) -> std::io::Result<()> {
    match fs::remove_dir_all(dir) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn write_checkpoint<G>(
    dir: &Path,
    metrics: &EvalMetrics,
    models: &ModelBundle<G>,
    optimizer: &GraphOptimizer,
) -> Result<()> {
    fs::create_dir_all(dir)?;
    models.save_to(dir)?;
    optimizer.save(dir.join(format!("{}.safetensors", optimizer.kind().as_str())))?;
    fs::write(dir.join("metrics.json"), serde_json::to_string_pretty(metrics)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelDims, OptimizerConfig};
    use candle_core::Device;
    use candle_nn::{linear, Linear};

    fn fixture() -> (ModelBundle<Linear>, GraphOptimizer) {
        let dims = ModelDims {
            image_embedding: 6,
            text_embedding: 5,
            projection: 4,
            vocab_size: 10,
            ..Default::default()
        };
        let models = ModelBundle::new(&dims, 0.0, &Device::Cpu, |vb| linear(4, 2, vb)).unwrap();
        let opt = GraphOptimizer::new(models.trainable_vars().unwrap(), OptimizerConfig::default());
        (models, opt)
    }

    fn auc(auc: f64, ap: f64) -> EvalMetrics {
        EvalMetrics::new().with("auc", auc).with("avg_precision", ap)
    }

    #[test]
    fn test_saves_on_improvement() {
        let tmp = tempfile::tempdir().unwrap();
        let (models, opt) = fixture();
        let mut policy = CheckpointPolicy::new(tmp.path(), "mmgnn", "auc");
        assert_eq!(policy.best(), f64::NEG_INFINITY);

        let out = policy.maybe_checkpoint(0, &auc(0.75, 0.5), &models, &opt);
        let dir = out.saved_path().unwrap().to_path_buf();
        assert_eq!(dir, tmp.path().join("mmgnn").join("0.75_0.5"));
        assert!(dir.join("graph.safetensors").exists());
        assert!(dir.join("image_encoder.safetensors").exists());
        assert!(dir.join("adam.safetensors").exists());
        assert!(dir.join("metrics.json").exists());
        assert_eq!(policy.best(), 0.75);
    }

    #[test]
    fn test_not_improved_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let (models, opt) = fixture();
        let mut policy = CheckpointPolicy::new(tmp.path(), "m", "auc");
        assert!(policy.maybe_checkpoint(0, &auc(0.8, 0.7), &models, &opt).is_saved());

        let out = policy.maybe_checkpoint(1, &auc(0.8, 0.9), &models, &opt);
        assert!(matches!(
            out,
            CheckpointOutcome::Skipped(SkipReason::NotImproved { best, current }) if best == 0.8 && current == 0.8
        ));
        assert!(!tmp.path().join("m").join("0.8_0.9").exists());
    }

    #[test]
    fn test_existing_directory_is_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let (models, opt) = fixture();
        let existing = tmp.path().join("m").join("0.75_0.5");
        fs::create_dir_all(&existing).unwrap();

        let mut policy = CheckpointPolicy::new(tmp.path(), "m", "auc");
        let out = policy.maybe_checkpoint(0, &auc(0.75, 0.5), &models, &opt);
        assert!(matches!(out, CheckpointOutcome::Skipped(SkipReason::AlreadyExists(p)) if p == existing));
        assert_eq!(policy.best(), f64::NEG_INFINITY);
        assert_eq!(fs::read_dir(&existing).unwrap().count(), 0);
    }

    #[test]
    fn test_nan_never_improves() {
        let tmp = tempfile::tempdir().unwrap();
        let (models, opt) = fixture();
        let mut policy = CheckpointPolicy::new(tmp.path(), "m", "auc");
        let out = policy.maybe_checkpoint(0, &auc(f64::NAN, f64::NAN), &models, &opt);
        assert!(matches!(out, CheckpointOutcome::Skipped(SkipReason::NotImproved { .. })));
        assert_eq!(policy.best(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_missing_metric() {
        let tmp = tempfile::tempdir().unwrap();
        let (models, opt) = fixture();
        let mut policy = CheckpointPolicy::new(tmp.path(), "m", "accuracy");
        let out = policy.maybe_checkpoint(0, &auc(0.9, 0.9), &models, &opt);
        assert!(matches!(out, CheckpointOutcome::Skipped(SkipReason::MissingMetric("accuracy"))));
    }

    #[test]
    fn test_write_failure_keeps_best() {
        let tmp = tempfile::tempdir().unwrap();
        let (models, opt) = fixture();
        // A plain file where the model directory should be.
        fs::write(tmp.path().join("m"), b"").unwrap();

        let mut policy = CheckpointPolicy::new(tmp.path(), "m", "auc");
        let out = policy.maybe_checkpoint(0, &auc(0.9, 0.9), &models, &opt);
        assert!(matches!(out, CheckpointOutcome::Failed(_)));
        assert_eq!(policy.best(), f64::NEG_INFINITY);
    }

    #[test]
    fn test_remove_partial() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("0.9_0.9");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("graph.safetensors"), b"partial").unwrap();

        remove_partial(&dir).unwrap();
        assert!(!dir.exists());
        // Nothing left to remove.
        remove_partial(&dir).unwrap();
    }

    #[test]
    fn test_remove_partial_reports_other_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("m");
        fs::write(&file, b"").unwrap();
        // A path through a regular file is neither removable nor missing.
        assert!(remove_partial(&file.join("0.9")).is_err());
    }
}
