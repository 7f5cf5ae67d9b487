//! Trainer configuration.
//!
//! Configuration is plain data: it deserialises from JSON with every field
//! optional, can be tweaked with `with_*` builders, and is checked once by
//! [`TrainerConfig::validate`] before a trainer is built.
//!
//! ```json
//! {
//!   "model_name": "vgae-memes",
//!   "trainer": "vgae",
//!   "epochs": 20,
//!   "optimizer": { "kind": "adamw", "learning_rate": 0.0005 },
//!   "connectivity": { "kind": "feature_knn", "k": 3 }
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::subgraph::ConnectivityRule;

/// Which model family a run trains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainerKind {
    /// Supervised GCN classifier over image/text pairs.
    Gnn,
    /// Variational graph autoencoder, evaluated by link prediction.
    Vgae,
}

impl TrainerKind {
    /// Evaluation metric that gates checkpoint writes.
    pub fn monitored_metric(self) -> &'static str {
        match self {
            TrainerKind::Gnn => "accuracy",
            TrainerKind::Vgae => "auc",
        }
    }
}

impl FromStr for TrainerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gnn" => Ok(TrainerKind::Gnn),
            "vgae" => Ok(TrainerKind::Vgae),
            other => Err(Error::InvalidConfig(format!("unknown trainer: {other}"))),
        }
    }
}

/// Optimizer family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    /// SGD with optional momentum.
    Sgd,
    /// Adam with L2 penalty folded into the gradient.
    Adam,
    /// Adam with decoupled weight decay.
    AdamW,
}

impl OptimizerKind {
    /// Lower-case name, also used as the optimizer artifact stem.
    pub fn as_str(self) -> &'static str {
        match self {
            OptimizerKind::Sgd => "sgd",
            OptimizerKind::Adam => "adam",
            OptimizerKind::AdamW => "adamw",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(OptimizerKind::Sgd),
            "adam" => Ok(OptimizerKind::Adam),
            "adamw" => Ok(OptimizerKind::AdamW),
            other => Err(Error::InvalidConfig(format!("unknown optimizer: {other}"))),
        }
    }
}

/// Optimizer hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub kind: OptimizerKind,
    /// Step size (default: 0.001).
    pub learning_rate: f64,
    /// L2 (Adam, SGD) or decoupled (AdamW) decay (default: 0.0).
    pub weight_decay: f64,
    /// SGD momentum (default: 0.9).
    pub momentum: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Adam,
            learning_rate: 1e-3,
            weight_decay: 0.0,
            momentum: 0.9,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
        }
    }
}

/// Widths of every layer in the model bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelDims {
    /// Image channels fed to the image encoder (default: 3).
    pub image_channels: usize,
    /// Raw image embedding width (default: 2048).
    pub image_embedding: usize,
    /// Raw text embedding width (default: 768).
    pub text_embedding: usize,
    /// Shared projection width; node feature width (default: 256).
    pub projection: usize,
    /// Text vocabulary size (default: 30522).
    pub vocab_size: usize,
    /// Classifier GCN hidden width (default: 64).
    pub gnn_hidden: usize,
    /// VGAE encoder hidden width (default: 64).
    pub vgae_hidden: usize,
    /// VGAE latent width (default: 16).
    pub vgae_latent: usize,
    /// Number of classes for the classifier (default: 2).
    pub num_classes: usize,
}

impl Default for ModelDims {
    fn default() -> Self {
        Self {
            image_channels: 3,
            image_embedding: 2048,
            text_embedding: 768,
            projection: 256,
            vocab_size: 30522,
            gnn_hidden: 64,
            vgae_hidden: 64,
            vgae_latent: 16,
            num_classes: 2,
        }
    }
}

/// Requested compute device, written `auto`, `cpu`, `cuda:N` or `metal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum DeviceRequest {
    /// First CUDA device, else Metal, else CPU.
    #[default]
    Auto,
    Cpu,
    Cuda(usize),
    Metal,
}

impl FromStr for DeviceRequest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "auto" => Ok(DeviceRequest::Auto),
            "cpu" => Ok(DeviceRequest::Cpu),
            "cuda" => Ok(DeviceRequest::Cuda(0)),
            "metal" | "mps" => Ok(DeviceRequest::Metal),
            _ => match s.strip_prefix("cuda:") {
                Some(ordinal) => ordinal
                    .parse()
                    .map(DeviceRequest::Cuda)
                    .map_err(|_| Error::InvalidConfig(format!("bad cuda ordinal: {ordinal}"))),
                None => Err(Error::InvalidConfig(format!("unknown device: {s}"))),
            },
        }
    }
}

impl TryFrom<String> for DeviceRequest {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<DeviceRequest> for String {
    fn from(d: DeviceRequest) -> Self {
        d.to_string()
    }
}

impl fmt::Display for DeviceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceRequest::Auto => write!(f, "auto"),
            DeviceRequest::Cpu => write!(f, "cpu"),
            DeviceRequest::Cuda(n) => write!(f, "cuda:{n}"),
            DeviceRequest::Metal => write!(f, "metal"),
        }
    }
}

/// Full configuration of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Directory name under `checkpoint_dir` (default: "mmgnn").
    pub model_name: String,
    pub trainer: TrainerKind,
    /// Number of training epochs (default: 10).
    pub epochs: usize,
    /// Batch size (default: 32).
    pub batch_size: usize,
    /// Seed for shuffling, negative sampling and VGAE noise (default: 42).
    pub seed: u64,
    pub device: DeviceRequest,
    /// Checkpoint root (default: "./checkpoints").
    pub checkpoint_dir: PathBuf,
    pub optimizer: OptimizerConfig,
    pub dims: ModelDims,
    /// Dropout in projection heads and the classifier (default: 0.1).
    pub dropout: f32,
    /// Keep encoder weights fixed and train projections + GNN only.
    pub freeze_encoders: bool,
    /// Edge rule for VGAE graphs.
    pub connectivity: ConnectivityRule,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            model_name: "mmgnn".to_string(),
            trainer: TrainerKind::Gnn,
            epochs: 10,
            batch_size: 32,
            seed: 42,
            device: DeviceRequest::Auto,
            checkpoint_dir: PathBuf::from("./checkpoints"),
            optimizer: OptimizerConfig::default(),
            dims: ModelDims::default(),
            dropout: 0.1,
            freeze_encoders: false,
            connectivity: ConnectivityRule::default(),
        }
    }
}

impl TrainerConfig {
    /// Load from a JSON file; absent fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    pub fn with_trainer(mut self, trainer: TrainerKind) -> Self {
        self.trainer = trainer;
        self
    }

    pub fn with_epochs(mut self, epochs: usize) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_device(mut self, device: DeviceRequest) -> Self {
        self.device = device;
        self
    }

    pub fn with_checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.checkpoint_dir = dir.into();
        self
    }

    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.optimizer.learning_rate = lr;
        self
    }

    pub fn with_optimizer(mut self, kind: OptimizerKind) -> Self {
        self.optimizer.kind = kind;
        self
    }

    pub fn with_dims(mut self, dims: ModelDims) -> Self {
        self.dims = dims;
        self
    }

    pub fn with_connectivity(mut self, rule: ConnectivityRule) -> Self {
        self.connectivity = rule;
        self
    }

    pub fn with_freeze_encoders(mut self, freeze: bool) -> Self {
        self.freeze_encoders = freeze;
        self
    }

    /// Reject configurations no trainer can run with.
    pub fn validate(&self) -> Result<()> {
        if self.model_name.trim().is_empty() {
            return Err(Error::InvalidConfig("model_name is empty".into()));
        }
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".into()));
        }
        let opt = &self.optimizer;
        if !(opt.learning_rate > 0.0 && opt.learning_rate.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "learning_rate must be positive, got {}",
                opt.learning_rate
            )));
        }
        if opt.weight_decay < 0.0 {
            return Err(Error::InvalidConfig("weight_decay must be >= 0".into()));
        }
        if !(0.0..1.0).contains(&opt.beta1) || !(0.0..1.0).contains(&opt.beta2) {
            return Err(Error::InvalidConfig("betas must lie in [0, 1)".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(Error::InvalidConfig("dropout must lie in [0, 1)".into()));
        }

        let d = &self.dims;
        let sizes = [
            ("image_channels", d.image_channels),
            ("image_embedding", d.image_embedding),
            ("text_embedding", d.text_embedding),
            ("projection", d.projection),
            ("vocab_size", d.vocab_size),
            ("gnn_hidden", d.gnn_hidden),
            ("vgae_hidden", d.vgae_hidden),
            ("vgae_latent", d.vgae_latent),
        ];
        for (name, size) in sizes {
            if size == 0 {
                return Err(Error::InvalidConfig(format!("dims.{name} must be > 0")));
            }
        }
        if d.num_classes < 2 {
            return Err(Error::InvalidConfig("dims.num_classes must be >= 2".into()));
        }
        if let ConnectivityRule::FeatureKnn { k: 0 } = self.connectivity {
            return Err(Error::InvalidConfig("feature_knn needs k > 0".into()));
        }
        Ok(())
    }
}
