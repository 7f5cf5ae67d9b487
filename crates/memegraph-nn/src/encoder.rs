//! Embedding producers: modality encoders and projection heads.
//!
//! Encoders map raw modality input to a modality-specific embedding
//! (images to 2048 dims, text to 768 dims by default). Projection heads map
//! both into one shared space so the two rows can sit in the same node matrix.
//!
//! The stock encoders are deliberately small. Anything implementing
//! [`ImageEncoder`] / [`TextEncoder`] (a pretrained CNN, a transformer) can
//! take their place.

use candle_core::{DType, Result, Tensor, D};
use candle_nn::{embedding, layer_norm, linear, ops, Embedding, LayerNorm, Linear, Module, VarBuilder};

/// Image modality encoder.
pub trait ImageEncoder {
    /// `(B, C, H, W)` images to `(B, output_dim)` embeddings.
    fn encode(&self, images: &Tensor, train: bool) -> Result<Tensor>;

    /// Embedding width.
    fn output_dim(&self) -> usize;
}

/// Text modality encoder.
pub trait TextEncoder {
    /// `(B, L)` token ids plus `(B, L)` 0/1 mask to `(B, output_dim)` embeddings.
    fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor>;

    /// Embedding width.
    fn output_dim(&self) -> usize;
}

impl<T: ImageEncoder + ?Sized> ImageEncoder for Box<T> {
    fn encode(&self, images: &Tensor, train: bool) -> Result<Tensor> {
        (**self).encode(images, train)
    }

    fn output_dim(&self) -> usize {
        (**self).output_dim()
    }
}

impl<T: TextEncoder + ?Sized> TextEncoder for Box<T> {
    fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor, train: bool) -> Result<Tensor> {
        (**self).encode(input_ids, attention_mask, train)
    }

    fn output_dim(&self) -> usize {
        (**self).output_dim()
    }
}

/// Global average pool over the spatial axes, then a linear map + ReLU.
pub struct PooledImageEncoder {
    proj: Linear,
    output_dim: usize,
}

impl PooledImageEncoder {
    pub fn new(in_channels: usize, output_dim: usize, vb: VarBuilder) -> Result<Self> {
        let proj = linear(in_channels, output_dim, vb.pp("proj"))?;
        Ok(Self { proj, output_dim })
    }
}

impl ImageEncoder for PooledImageEncoder {
    fn encode(&self, images: &Tensor, _train: bool) -> Result<Tensor> {
        // (B, C, H, W) -> (B, C)
        let pooled = images.mean(D::Minus1)?.mean(D::Minus1)?;
        self.proj.forward(&pooled)?.relu()
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }
}

/// Token embedding table followed by a masked mean over the sequence.
pub struct MeanPoolTextEncoder {
    embeddings: Embedding,
    output_dim: usize,
}

impl MeanPoolTextEncoder {
    pub fn new(vocab_size: usize, output_dim: usize, vb: VarBuilder) -> Result<Self> {
        let embeddings = embedding(vocab_size, output_dim, vb.pp("word_embeddings"))?;
        Ok(Self {
            embeddings,
            output_dim,
        })
    }
}

impl TextEncoder for MeanPoolTextEncoder {
    fn encode(&self, input_ids: &Tensor, attention_mask: &Tensor, _train: bool) -> Result<Tensor> {
        let tokens = self.embeddings.forward(input_ids)?; // (B, L, D)
        let mask = attention_mask.to_dtype(DType::F32)?.unsqueeze(2)?; // (B, L, 1)
        let summed = tokens.broadcast_mul(&mask)?.sum(1)?; // (B, D)
        // Fully padded rows would divide by zero.
        let counts = (mask.sum(1)? + 1e-9)?; // (B, 1)
        summed.broadcast_div(&counts)
    }

    fn output_dim(&self) -> usize {
        self.output_dim
    }
}

/// CLIP-style projection head.
///
/// ```text
/// p = W1 x
/// h = LayerNorm(dropout(W2 gelu(p)) + p)
/// ```
pub struct ProjectionHead {
    projection: Linear,
    fc: Linear,
    norm: LayerNorm,
    dropout: f32,
}

impl ProjectionHead {
    /// # Arguments
    /// - `embedding_dim`: width of the encoder output
    /// - `projection_dim`: width of the shared space
    /// - `dropout`: drop probability applied in training mode
    pub fn new(
        embedding_dim: usize,
        projection_dim: usize,
        dropout: f32,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            projection: linear(embedding_dim, projection_dim, vb.pp("projection"))?,
            fc: linear(projection_dim, projection_dim, vb.pp("fc"))?,
            norm: layer_norm(projection_dim, 1e-5, vb.pp("layer_norm"))?,
            dropout,
        })
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let projected = self.projection.forward(x)?;
        let mut h = self.fc.forward(&projected.gelu()?)?;
        if train && self.dropout > 0.0 {
            h = ops::dropout(&h, self.dropout)?;
        }
        self.norm.forward(&(h + projected)?)
    }
}

impl Module for ProjectionHead {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        self.forward_t(xs, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_image_encoder_pools_any_resolution() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let enc = PooledImageEncoder::new(3, 32, vb).unwrap();

        for (h, w) in [(8, 8), (5, 11)] {
            let images = Tensor::randn(0f32, 1f32, (2, 3, h, w), &device).unwrap();
            let out = enc.encode(&images, false).unwrap();
            assert_eq!(out.dims(), &[2, 32]);
        }
    }

    #[test]
    fn test_text_encoder_ignores_padding() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let enc = MeanPoolTextEncoder::new(10, 4, vb).unwrap();

        let short = Tensor::new(&[[3u32, 5]], &device).unwrap();
        let short_mask = Tensor::new(&[[1u32, 1]], &device).unwrap();
        let padded = Tensor::new(&[[3u32, 5, 0, 0]], &device).unwrap();
        let padded_mask = Tensor::new(&[[1u32, 1, 0, 0]], &device).unwrap();

        let a = enc.encode(&short, &short_mask, false).unwrap().to_vec2::<f32>().unwrap();
        let b = enc.encode(&padded, &padded_mask, false).unwrap().to_vec2::<f32>().unwrap();
        for (x, y) in a[0].iter().zip(b[0].iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_projection_head_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let head = ProjectionHead::new(48, 16, 0.1, vb).unwrap();

        let x = Tensor::randn(0f32, 1f32, (5, 48), &device).unwrap();
        assert_eq!(head.forward_t(&x, true).unwrap().dims(), &[5, 16]);
        assert_eq!(head.forward(&x).unwrap().dims(), &[5, 16]);
    }
}
