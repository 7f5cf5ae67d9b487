//! Training, evaluation and checkpointing for multimodal meme GNNs.
//!
//! Each meme becomes a small graph (an image node and a text node). Two
//! model families train on those graphs:
//!
//! | Trainer | Objective | Monitored metric |
//! |---------|-----------|------------------|
//! | [`GnnTrainer`] | Graph classification, cross-entropy | `accuracy` |
//! | [`VgaeTrainer`] | Edge reconstruction + KL | `auc` |
//!
//! # Modules
//!
//! - [`config`]: [`TrainerConfig`], JSON-loadable with `with_*` overrides
//! - [`data`]: [`MemeDataset`], [`MemeBatch`] and the [`BatchSource`] seam
//! - [`subgraph`]: per-batch graph construction and [`ConnectivityRule`]
//! - [`sampling`]: negative edge sampling
//! - [`bundle`]: [`ModelBundle`] of encoders, projections and graph model
//! - [`optim`]: [`GraphOptimizer`] (SGD, Adam, AdamW)
//! - [`strategy`]: per-model forward, loss and evaluation
//! - [`metrics`]: running accuracy, ROC-AUC and average precision
//! - [`checkpoint`]: best-metric checkpoint policy
//! - [`trainer`]: the epoch loop
//!
//! # Example
//!
//! ```rust,ignore
//! use memegraph_train::{DeviceInfo, MemeDataset, TrainerConfig, TrainerKind, VgaeTrainer};
//!
//! let config = TrainerConfig::default().with_trainer(TrainerKind::Vgae).with_epochs(5);
//! let device = DeviceInfo::resolve(config.device)?;
//! let train = MemeDataset::from_jsonl("train.jsonl", [3, 32, 32])?;
//! let dev = MemeDataset::from_jsonl("dev.jsonl", [3, 32, 32])?;
//!
//! let mut trainer = VgaeTrainer::from_config(config, device.clone())?;
//! let report = trainer.fit(
//!     &mut train.loader(32, Some(42), &device.device),
//!     Some(&mut dev.loader(32, None, &device.device)),
//! )?;
//! ```

pub mod bundle;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod metrics;
pub mod optim;
pub mod sampling;
pub mod strategy;
pub mod subgraph;
pub mod trainer;

pub use bundle::{Component, Embeddings, ModelBundle};
pub use checkpoint::{CheckpointOutcome, CheckpointPolicy, SkipReason};
pub use config::{DeviceRequest, ModelDims, OptimizerConfig, OptimizerKind, TrainerConfig, TrainerKind};
pub use data::{BatchSource, DataLoader, MemeBatch, MemeDataset, MemeExample};
pub use device::DeviceInfo;
pub use error::{Error, Result};
pub use metrics::{average_precision_score, roc_auc_score, EvalMetrics, LinkPredictionMetrics, RunningMetrics};
pub use optim::GraphOptimizer;
pub use sampling::negative_sampling;
pub use strategy::{ClassifierStrategy, TrainingStrategy, VgaeStrategy};
pub use subgraph::{build_subgraph, build_vgae_subgraph, ConnectivityRule};
pub use trainer::{FitReport, GnnTrainer, Trainer, VgaeTrainer};
