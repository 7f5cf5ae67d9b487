//! Graph neural network building blocks for multimodal meme graphs.
//!
//! `memegraph-nn` holds everything that runs on tensors: the graph batch
//! representation, GCN message passing, the modality encoders and projection
//! heads, and the two graph models trained by `memegraph-train`.
//!
//! # Modules
//!
//! - [`graph`]: [`EdgeIndex`], [`GraphBatch`] and GCN normalisation
//! - [`conv`]: Message-passing layer ([`GCNConv`])
//! - [`encoder`]: Image/text encoders and the CLIP-style [`ProjectionHead`]
//! - [`classifier`]: [`GcnClassifier`] for graph-level classification
//! - [`vgae`]: [`DeepVgae`] for link-prediction pretraining
//!
//! # Example: Classifier Forward Pass
//!
//! ```rust,ignore
//! use memegraph_nn::{EdgeIndex, GcnClassifier, GraphBatch};
//! use candle_nn::{VarBuilder, VarMap};
//!
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
//! let model = GcnClassifier::new(256, 64, 2, 0.5, vb)?;
//!
//! // One meme: node 0 = image, node 1 = text.
//! let graph = GraphBatch::new(x, EdgeIndex::from_pairs([(0, 1), (1, 0)]), vec![0, 0])?;
//! let logits = model.forward_t(&graph, false)?.logits;  // (1, 2)
//! ```

pub mod classifier;
pub mod conv;
pub mod encoder;
pub mod error;
pub mod graph;
pub mod vgae;

pub use classifier::{ClassifierOutput, GcnClassifier};
pub use conv::GCNConv;
pub use encoder::{ImageEncoder, MeanPoolTextEncoder, PooledImageEncoder, ProjectionHead, TextEncoder};
pub use error::{Error, Result};
pub use graph::{gcn_norm, EdgeIndex, GraphBatch};
pub use vgae::{DeepVgae, GcnEncoder, VgaeEncoding};
