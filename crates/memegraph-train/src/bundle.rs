//! The model bundle: encoders, projection heads and one graph model.
//!
//! Every member is a [`Component`] owning its own [`VarMap`], so each can be
//! saved, restored and (for the encoders) frozen on its own. Checkpoints hold
//! one safetensors file per component, named after the bundle field:
//!
//! ```text
//! image_encoder.safetensors
//! text_encoder.safetensors
//! image_projection.safetensors
//! text_projection.safetensors
//! graph.safetensors
//! ```

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor, Var};
use candle_nn::{VarBuilder, VarMap};
use memegraph_nn::{ImageEncoder, MeanPoolTextEncoder, PooledImageEncoder, ProjectionHead, TextEncoder};

use crate::config::ModelDims;
use crate::data::MemeBatch;
use crate::error::{Error, Result};

/// A module together with the variables it was built from.
pub struct Component<M> {
    name: &'static str,
    varmap: VarMap,
    module: M,
}

impl<M> Component<M> {
    /// Build `M` from a fresh [`VarMap`] on `device`.
    pub fn build<F>(name: &'static str, device: &Device, init: F) -> Result<Self>
    where
        F: FnOnce(VarBuilder) -> candle_core::Result<M>,
    {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, device);
        let module = init(vb)?;
        Ok(Self {
            name,
            varmap,
            module,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn module(&self) -> &M {
        &self.module
    }

    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    /// Variables qualified as `<component>.<var>`, sorted by name.
    pub fn vars(&self) -> Result<Vec<(String, Var)>> {
        let data = self
            .varmap
            .data()
            .lock()
            .map_err(|_| Error::Checkpoint(format!("{} variables are poisoned", self.name)))?;
        let mut vars: Vec<(String, Var)> = data
            .iter()
            .map(|(k, v)| (format!("{}.{k}", self.name), v.clone()))
            .collect();
        vars.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(vars)
    }

    /// `<dir>/<name>.safetensors`.
    pub fn file_in(&self, dir: &Path) -> PathBuf {
        dir.join(format!("{}.safetensors", self.name))
    }
}

/// Object-safe view of a component for saving and restoring.
pub trait Checkpointable {
    fn name(&self) -> &'static str;
    fn save(&self, dir: &Path) -> Result<PathBuf>;
    fn load(&mut self, dir: &Path) -> Result<()>;
}

impl<M> Checkpointable for Component<M> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = self.file_in(dir);
        self.varmap.save(&path)?;
        Ok(path)
    }

    fn load(&mut self, dir: &Path) -> Result<()> {
        let path = self.file_in(dir);
        if !path.exists() {
            return Err(Error::Checkpoint(format!("missing {}", path.display())));
        }
        self.varmap.load(&path)?;
        Ok(())
    }
}

/// Embeddings for one batch.
#[derive(Debug, Clone)]
pub struct Embeddings {
    /// Projected image embeddings `(B, projection)`.
    pub image: Tensor,
    /// Raw image encoder output `(B, image_embedding)`, detached.
    pub image_features: Tensor,
    /// Projected text embeddings `(B, projection)`.
    pub text: Tensor,
}

/// Encoders, projection heads and the graph model `G`.
pub struct ModelBundle<G> {
    pub image_encoder: Component<Box<dyn ImageEncoder>>,
    pub text_encoder: Component<Box<dyn TextEncoder>>,
    pub image_projection: Component<ProjectionHead>,
    pub text_projection: Component<ProjectionHead>,
    pub graph: Component<G>,
    freeze_encoders: bool,
}

impl<G> ModelBundle<G> {
    /// Stock encoders and projection heads sized by `dims`, plus a graph
    /// model from `graph`.
    pub fn new<F>(dims: &ModelDims, dropout: f32, device: &Device, graph: F) -> Result<Self>
    where
        F: FnOnce(VarBuilder) -> candle_core::Result<G>,
    {
        let image_encoder = Component::build("image_encoder", device, |vb| {
            PooledImageEncoder::new(dims.image_channels, dims.image_embedding, vb)
                .map(|e| Box::new(e) as Box<dyn ImageEncoder>)
        })?;
        let text_encoder = Component::build("text_encoder", device, |vb| {
            MeanPoolTextEncoder::new(dims.vocab_size, dims.text_embedding, vb)
                .map(|e| Box::new(e) as Box<dyn TextEncoder>)
        })?;
        Self::with_encoders(image_encoder, text_encoder, dims, dropout, device, graph)
    }

    /// Custom encoders; projection heads are sized from their output widths.
    pub fn with_encoders<F>(
        image_encoder: Component<Box<dyn ImageEncoder>>,
        text_encoder: Component<Box<dyn TextEncoder>>,
        dims: &ModelDims,
        dropout: f32,
        device: &Device,
        graph: F,
    ) -> Result<Self>
    where
        F: FnOnce(VarBuilder) -> candle_core::Result<G>,
    {
        let image_dim = image_encoder.module().output_dim();
        let text_dim = text_encoder.module().output_dim();
        Ok(Self {
            image_projection: Component::build("image_projection", device, |vb| {
                ProjectionHead::new(image_dim, dims.projection, dropout, vb)
            })?,
            text_projection: Component::build("text_projection", device, |vb| {
                ProjectionHead::new(text_dim, dims.projection, dropout, vb)
            })?,
            graph: Component::build("graph", device, graph)?,
            image_encoder,
            text_encoder,
            freeze_encoders: false,
        })
    }

    /// Exclude encoder variables from [`Self::trainable_vars`] and stop
    /// gradients at the encoder outputs.
    pub fn set_freeze_encoders(&mut self, freeze: bool) {
        self.freeze_encoders = freeze;
    }

    pub fn encoders_frozen(&self) -> bool {
        self.freeze_encoders
    }

    /// Encode and project both modalities.
    pub fn embed(&self, batch: &MemeBatch, train: bool) -> Result<Embeddings> {
        let mut features = self.image_encoder.module().encode(&batch.images, train)?;
        let mut text = self
            .text_encoder
            .module()
            .encode(&batch.input_ids, &batch.attention_mask, train)?;
        if self.freeze_encoders {
            features = features.detach();
            text = text.detach();
        }

        let image = self.image_projection.module().forward_t(&features, train)?;
        let text = self.text_projection.module().forward_t(&text, train)?;
        Ok(Embeddings {
            image,
            image_features: features.detach(),
            text,
        })
    }

    /// Variables the optimizer should update.
    pub fn trainable_vars(&self) -> Result<Vec<(String, Var)>> {
        let mut vars = Vec::new();
        if !self.freeze_encoders {
            vars.extend(self.image_encoder.vars()?);
            vars.extend(self.text_encoder.vars()?);
        }
        vars.extend(self.image_projection.vars()?);
        vars.extend(self.text_projection.vars()?);
        vars.extend(self.graph.vars()?);
        Ok(vars)
    }

    fn components(&self) -> [&dyn Checkpointable; 5] {
        [
            &self.image_encoder,
            &self.text_encoder,
            &self.image_projection,
            &self.text_projection,
            &self.graph,
        ]
    }

    fn components_mut(&mut self) -> [&mut dyn Checkpointable; 5] {
        [
            &mut self.image_encoder,
            &mut self.text_encoder,
            &mut self.image_projection,
            &mut self.text_projection,
            &mut self.graph,
        ]
    }

    /// Write one file per component into an existing directory.
    pub fn save_to(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        self.components().iter().map(|c| c.save(dir)).collect()
    }

    /// Restore every component from a directory written by [`Self::save_to`].
    pub fn load_from(&mut self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        for c in self.components_mut() {
            c.load(dir)?;
        }
        Ok(())
    }
}
