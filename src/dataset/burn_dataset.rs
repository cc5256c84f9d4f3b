//! Burn Dataset Integration
//!
//! Implements Burn's `Dataset` trait and `Batcher` so the leaf images can be
//! fed to the model as `[N, 3, H, W]` float tensors with integer targets.

use std::path::PathBuf;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::loader::{load_image, to_chw, ImageFolder, ImageSample};
use crate::utils::error::Result;

/// A preprocessed image ready for batching
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeafItem {
    /// Flattened CHW image in `[0, 1]`
    pub image: Vec<f32>,
    pub label: usize,
    /// Source path, for logging
    pub path: String,
}

impl LeafItem {
    /// Load and preprocess an image
    pub fn from_path(path: &PathBuf, label: usize, image_size: (u32, u32)) -> Result<Self> {
        let img = load_image(path, image_size)?;
        Ok(Self {
            image: to_chw(&img),
            label,
            path: path.to_string_lossy().to_string(),
        })
    }
}

/// Lazily loading dataset over an [`ImageFolder`]
#[derive(Debug, Clone)]
pub struct LeafImageDataset {
    samples: Vec<ImageSample>,
    image_size: (u32, u32),
}

impl LeafImageDataset {
    pub fn new(samples: Vec<ImageSample>, image_size: (u32, u32)) -> Self {
        Self {
            samples,
            image_size,
        }
    }

    pub fn from_folder(folder: &ImageFolder, image_size: (u32, u32)) -> Self {
        Self::new(folder.samples.clone(), image_size)
    }
}

impl Dataset<LeafItem> for LeafImageDataset {
    fn get(&self, index: usize) -> Option<LeafItem> {
        let sample = self.samples.get(index)?;
        match LeafItem::from_path(&sample.path, sample.label, self.image_size) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!("{}", e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of leaf images
#[derive(Clone, Debug)]
pub struct LeafBatch<B: Backend> {
    /// Images with shape `[batch_size, 3, height, width]`
    pub images: Tensor<B, 4>,
    /// Class indices with shape `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks [`LeafItem`]s into a [`LeafBatch`]
#[derive(Clone, Debug)]
pub struct LeafBatcher {
    image_size: (u32, u32),
}

impl LeafBatcher {
    /// `image_size` is `(height, width)`
    pub fn new(image_size: (u32, u32)) -> Self {
        Self { image_size }
    }
}

impl<B: Backend> Batcher<B, LeafItem, LeafBatch<B>> for LeafBatcher {
    fn batch(&self, items: Vec<LeafItem>, device: &B::Device) -> LeafBatch<B> {
        let batch_size = items.len();
        let (height, width) = (self.image_size.0 as usize, self.image_size.1 as usize);

        let mut images_data = Vec::with_capacity(batch_size * 3 * height * width);
        let mut targets_data = Vec::with_capacity(batch_size);
        for item in items {
            images_data.extend(item.image);
            targets_data.push(item.label as i64);
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, height, width]),
            device,
        );
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        LeafBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::test_utils::write_image_folder;

    type TestBackend = burn_ndarray::NdArray;

    #[test]
    fn test_batcher_shapes() {
        let device = Default::default();
        let batcher = LeafBatcher::new((4, 6));

        let items = vec![
            LeafItem {
                image: vec![0.5; 3 * 4 * 6],
                label: 2,
                path: "a.png".into(),
            },
            LeafItem {
                image: vec![0.25; 3 * 4 * 6],
                label: 0,
                path: "b.png".into(),
            },
        ];

        let batch: LeafBatch<TestBackend> = batcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [2, 3, 4, 6]);
        assert_eq!(batch.targets.dims(), [2]);

        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![2, 0]);
    }

    #[test]
    fn test_dataset_loads_lazily() {
        let dir = tempfile::tempdir().unwrap();
        write_image_folder(dir.path(), &["healthy", "rust"], &[1, 2]);
        let folder = ImageFolder::scan(dir.path(), None).unwrap();

        let dataset = LeafImageDataset::from_folder(&folder, (8, 8));
        assert_eq!(dataset.len(), 3);

        let item = dataset.get(2).unwrap();
        assert_eq!(item.label, 1);
        assert_eq!(item.image.len(), 3 * 8 * 8);
        assert!(dataset.get(3).is_none());
    }
}
