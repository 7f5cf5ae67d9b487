//! Meme examples, batches and the batch source seam.
//!
//! The training loops only ever see a [`BatchSource`]: an iterator of
//! [`MemeBatch`]es whose four tensors are aligned by row. [`MemeDataset`] and
//! its [`DataLoader`] are the in-process implementation, reading
//! pre-tokenised examples from JSON Lines:
//!
//! ```text
//! {"image": [0.1, 0.4, ...], "input_ids": [101, 2023, 102], "label": 1}
//! ```
//!
//! `image` is a flattened `C x H x W` array; tokenisation and image decoding
//! happen upstream.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use candle_core::{Device, Tensor};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One pre-processed meme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemeExample {
    /// Flattened `C x H x W` pixel values.
    pub image: Vec<f32>,
    /// Token ids, unpadded.
    pub input_ids: Vec<u32>,
    /// Class label.
    pub label: u32,
}

/// A batch of `B` memes as device tensors.
#[derive(Debug, Clone)]
pub struct MemeBatch {
    /// `(B, C, H, W)` f32.
    pub images: Tensor,
    /// `(B, L)` u32, zero padded.
    pub input_ids: Tensor,
    /// `(B, L)` u32, 1 on real tokens.
    pub attention_mask: Tensor,
    /// `(B,)` u32.
    pub labels: Tensor,
}

impl MemeBatch {
    /// Stack examples, padding token sequences to the longest one.
    pub fn from_examples(
        examples: &[&MemeExample],
        image_shape: [usize; 3],
        device: &Device,
    ) -> Result<Self> {
        let b = examples.len();
        let [c, h, w] = image_shape;
        let max_len = examples.iter().map(|e| e.input_ids.len()).max().unwrap_or(0).max(1);

        let mut pixels = Vec::with_capacity(b * c * h * w);
        let mut ids = vec![0u32; b * max_len];
        let mut mask = vec![0u32; b * max_len];
        let mut labels = Vec::with_capacity(b);

        for (row, ex) in examples.iter().enumerate() {
            if ex.image.len() != c * h * w {
                return Err(Error::InvalidData {
                    location: format!("batch row {row}"),
                    reason: format!("image has {} values, expected {}", ex.image.len(), c * h * w),
                });
            }
            pixels.extend_from_slice(&ex.image);
            for (col, &tok) in ex.input_ids.iter().enumerate() {
                ids[row * max_len + col] = tok;
                mask[row * max_len + col] = 1;
            }
            labels.push(ex.label);
        }

        Ok(Self {
            images: Tensor::from_vec(pixels, (b, c, h, w), device)?,
            input_ids: Tensor::from_vec(ids, (b, max_len), device)?,
            attention_mask: Tensor::from_vec(mask, (b, max_len), device)?,
            labels: Tensor::from_vec(labels, b, device)?,
        })
    }

    /// Copy all four tensors to `device`.
    pub fn to_device(&self, device: &Device) -> Result<Self> {
        Ok(Self {
            images: self.images.to_device(device)?,
            input_ids: self.input_ids.to_device(device)?,
            attention_mask: self.attention_mask.to_device(device)?,
            labels: self.labels.to_device(device)?,
        })
    }

    /// Number of examples.
    pub fn len(&self) -> Result<usize> {
        Ok(self.labels.dims1()?)
    }

    /// True for a zero-row batch.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Labels copied to the host.
    pub fn labels_vec(&self) -> Result<Vec<u32>> {
        Ok(self.labels.to_vec1::<u32>()?)
    }
}

/// Anything that can hand the trainer one epoch of batches.
pub trait BatchSource {
    /// Batches for one pass over the data.
    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<MemeBatch>> + '_>;
}

/// In-memory collection of examples sharing one image shape.
#[derive(Debug, Clone)]
pub struct MemeDataset {
    examples: Vec<MemeExample>,
    image_shape: [usize; 3],
}

impl MemeDataset {
    /// Wrap examples, checking each image matches `image_shape`.
    pub fn new(examples: Vec<MemeExample>, image_shape: [usize; 3]) -> Result<Self> {
        let expected: usize = image_shape.iter().product();
        if let Some((i, ex)) = examples
            .iter()
            .enumerate()
            .find(|(_, ex)| ex.image.len() != expected)
        {
            return Err(Error::InvalidData {
                location: format!("example {i}"),
                reason: format!("image has {} values, expected {expected}", ex.image.len()),
            });
        }
        Ok(Self {
            examples,
            image_shape,
        })
    }

    /// Read one example per non-blank line.
    pub fn from_jsonl(path: impl AsRef<Path>, image_shape: [usize; 3]) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let mut examples = Vec::new();
        for (lineno, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let ex: MemeExample = serde_json::from_str(&line).map_err(|e| Error::InvalidData {
                location: format!("{}:{}", path.display(), lineno + 1),
                reason: e.to_string(),
            })?;
            examples.push(ex);
        }
        Self::new(examples, image_shape)
    }

    /// Write one example per line.
    pub fn write_jsonl(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut out = BufWriter::new(File::create(path)?);
        for ex in &self.examples {
            serde_json::to_writer(&mut out, ex)?;
            out.write_all(b"\n")?;
        }
        out.flush()?;
        Ok(())
    }

    /// Separable toy data: each class gets its own pixel offset and its own
    /// half of the vocabulary. Used for smoke runs and tests.
    pub fn synthetic(
        num_examples: usize,
        image_shape: [usize; 3],
        vocab_size: usize,
        seed: u64,
    ) -> Result<Self> {
        if vocab_size < 4 {
            return Err(Error::InvalidConfig("synthetic data needs vocab_size >= 4".into()));
        }
        let mut rng = XorShiftRng::seed_from_u64(seed);
        let pixels: usize = image_shape.iter().product();
        // Token 0 is padding.
        let half = (vocab_size - 1) / 2;

        let examples = (0..num_examples)
            .map(|i| {
                let label = (i % 2) as u32;
                let offset = label as f32 * 0.5;
                let image = (0..pixels).map(|_| offset + rng.gen::<f32>() * 0.5).collect();
                let len = rng.gen_range(3..8);
                let base = 1 + label as usize * half;
                let input_ids = (0..len).map(|_| (base + rng.gen_range(0..half)) as u32).collect();
                MemeExample {
                    image,
                    input_ids,
                    label,
                }
            })
            .collect();
        Self::new(examples, image_shape)
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn examples(&self) -> &[MemeExample] {
        &self.examples
    }

    pub fn image_shape(&self) -> [usize; 3] {
        self.image_shape
    }

    /// Batch iterator over this dataset. With `shuffle_seed`, each call to
    /// [`BatchSource::batches`] visits examples in a fresh seeded order.
    pub fn loader(&self, batch_size: usize, shuffle_seed: Option<u64>, device: &Device) -> DataLoader<'_> {
        DataLoader {
            dataset: self,
            batch_size: batch_size.max(1),
            rng: shuffle_seed.map(XorShiftRng::seed_from_u64),
            device: device.clone(),
        }
    }
}

/// Batches a [`MemeDataset`] onto a device.
pub struct DataLoader<'a> {
    dataset: &'a MemeDataset,
    batch_size: usize,
    rng: Option<XorShiftRng>,
    device: Device,
}

impl BatchSource for DataLoader<'_> {
    fn batches(&mut self) -> Box<dyn Iterator<Item = Result<MemeBatch>> + '_> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if let Some(rng) = self.rng.as_mut() {
            order.shuffle(rng);
        }

        let dataset = self.dataset;
        let device = self.device.clone();
        let batches: Vec<Vec<usize>> = order.chunks(self.batch_size).map(<[usize]>::to_vec).collect();

        Box::new(batches.into_iter().map(move |idx| {
            let rows: Vec<&MemeExample> = idx.iter().map(|&i| &dataset.examples[i]).collect();
            MemeBatch::from_examples(&rows, dataset.image_shape, &device)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(label: u32, tokens: &[u32]) -> MemeExample {
        MemeExample {
            image: vec![label as f32; 2 * 2 * 2],
            input_ids: tokens.to_vec(),
            label,
        }
    }

    #[test]
    fn test_batch_pads_and_masks() {
        let a = example(0, &[5, 6, 7]);
        let b = example(1, &[9]);
        let batch = MemeBatch::from_examples(&[&a, &b], [2, 2, 2], &Device::Cpu).unwrap();

        assert_eq!(batch.images.dims(), &[2, 2, 2, 2]);
        assert_eq!(
            batch.input_ids.to_vec2::<u32>().unwrap(),
            vec![vec![5, 6, 7], vec![9, 0, 0]]
        );
        assert_eq!(
            batch.attention_mask.to_vec2::<u32>().unwrap(),
            vec![vec![1, 1, 1], vec![1, 0, 0]]
        );
        assert_eq!(batch.labels_vec().unwrap(), vec![0, 1]);
        assert_eq!(batch.len().unwrap(), 2);
    }

    #[test]
    fn test_dataset_rejects_wrong_image_size() {
        let mut bad = example(0, &[1]);
        bad.image.pop();
        let err = MemeDataset::new(vec![example(1, &[2]), bad], [2, 2, 2]).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
    }

    #[test]
    fn test_loader_covers_every_example_once() {
        let examples: Vec<_> = (0..7).map(|i| example(i % 2, &[i])).collect();
        let ds = MemeDataset::new(examples, [2, 2, 2]).unwrap();
        let mut loader = ds.loader(3, Some(1), &Device::Cpu);

        let sizes: Vec<usize> = loader
            .batches()
            .map(|b| b.unwrap().len().unwrap())
            .collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let mut seen: Vec<u32> = loader
            .batches()
            .flat_map(|b| b.unwrap().input_ids.to_vec2::<u32>().unwrap())
            .map(|row| row[0])
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..7).collect::<Vec<u32>>());
    }

    #[test]
    fn test_synthetic_is_seeded_and_balanced() {
        let a = MemeDataset::synthetic(10, [3, 4, 4], 100, 5).unwrap();
        let b = MemeDataset::synthetic(10, [3, 4, 4], 100, 5).unwrap();
        assert_eq!(a.examples(), b.examples());
        assert_eq!(a.examples().iter().filter(|e| e.label == 1).count(), 5);
        assert!(a
            .examples()
            .iter()
            .flat_map(|e| &e.input_ids)
            .all(|&t| t > 0 && t < 100));
    }

    #[test]
    fn test_jsonl_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("split.jsonl");
        let ds = MemeDataset::new(vec![example(0, &[1, 2]), example(1, &[3])], [2, 2, 2]).unwrap();
        ds.write_jsonl(&path).unwrap();

        let back = MemeDataset::from_jsonl(&path, [2, 2, 2]).unwrap();
        assert_eq!(back.examples(), ds.examples());
    }

    #[test]
    fn test_jsonl_reports_line_number() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.jsonl");
        std::fs::write(&path, "{\"image\": [0,0,0,0,0,0,0,0], \"input_ids\": [], \"label\": 0}\nnot json\n").unwrap();

        match MemeDataset::from_jsonl(&path, [2, 2, 2]) {
            Err(Error::InvalidData { location, .. }) => assert!(location.ends_with(":2")),
            other => panic!("expected InvalidData, got {other:?}"),
        }
    }
}
