//! Directory-backed batch generator
//!
//! Streams batches of preprocessed [`LeafItem`]s from a class-per-directory
//! tree. Nothing is cached: each epoch re-decodes its images, in parallel
//! per batch, and applies fresh augmentation when configured.

use std::collections::BTreeMap;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{info, warn};

use crate::config::ProjectConfig;
use crate::dataset::augmentation::{AugmentationConfig, Augmenter};
use crate::dataset::burn_dataset::LeafItem;
use crate::dataset::loader::{load_image, to_chw, ImageFolder};
use crate::utils::error::{LeafError, Result};

/// Settings for a [`DirectoryGenerator`]
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// `(height, width)` every image is resized to
    pub target_size: (u32, u32),
    pub batch_size: usize,
    pub shuffle: bool,
    pub seed: u64,
    /// `None` means rescale only
    pub augmentation: Option<AugmentationConfig>,
}

impl GeneratorConfig {
    pub fn new(target_size: (u32, u32), batch_size: usize) -> Self {
        Self {
            target_size,
            batch_size,
            shuffle: true,
            seed: 42,
            augmentation: None,
        }
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_augmentation(mut self, augmentation: AugmentationConfig) -> Self {
        self.augmentation = Some(augmentation);
        self
    }
}

/// Batch iterator over an image folder
#[derive(Debug, Clone)]
pub struct DirectoryGenerator {
    folder: ImageFolder,
    config: GeneratorConfig,
    augmenter: Option<Augmenter>,
}

impl DirectoryGenerator {
    /// Scan `dir` and build a generator
    ///
    /// `class_names` fixes the label mapping (see [`ImageFolder::scan`]).
    pub fn new<P: AsRef<Path>>(
        dir: P,
        class_names: Option<&[String]>,
        config: GeneratorConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 {
            return Err(LeafError::InvalidInput("batch_size must be greater than 0".into()));
        }

        let folder = ImageFolder::scan(dir, class_names)?;
        let augmenter = config.augmentation.clone().map(Augmenter::new);

        info!(
            "Found {} images belonging to {} classes in {:?}",
            folder.len(),
            folder.num_classes(),
            folder.root
        );

        Ok(Self {
            folder,
            config,
            augmenter,
        })
    }

    pub fn samples(&self) -> usize {
        self.folder.len()
    }

    pub fn class_indices(&self) -> BTreeMap<String, usize> {
        self.folder.class_indices()
    }

    pub fn class_names(&self) -> &[String] {
        &self.folder.class_names
    }

    pub fn num_classes(&self) -> usize {
        self.folder.num_classes()
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    pub fn target_size(&self) -> (u32, u32) {
        self.config.target_size
    }

    pub fn folder(&self) -> &ImageFolder {
        &self.folder
    }

    /// Batches per epoch, counting a final partial batch
    pub fn num_batches(&self) -> usize {
        self.samples().div_ceil(self.config.batch_size)
    }

    /// Sample order for an epoch
    pub fn order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.samples()).collect();
        if self.config.shuffle {
            let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }

    /// Iterate the batches of epoch `epoch`
    pub fn epoch(&self, epoch: usize) -> EpochBatches<'_> {
        EpochBatches {
            generator: self,
            order: self.order(epoch),
            epoch,
            position: 0,
        }
    }

    /// Decode the given samples in parallel
    fn load_batch(&self, indices: &[usize], epoch: usize) -> Result<Vec<LeafItem>> {
        indices
            .par_iter()
            .map(|&index| self.load_item(index, epoch))
            .collect()
    }

    fn load_item(&self, index: usize, epoch: usize) -> Result<LeafItem> {
        let sample = &self.folder.samples[index];
        let mut img = load_image(&sample.path, self.config.target_size)?;

        if let Some(augmenter) = &self.augmenter {
            // Seeded per sample so results do not depend on thread scheduling
            let seed = self
                .config
                .seed
                .wrapping_mul(0x9E37_79B9_7F4A_7C15)
                .wrapping_add((epoch as u64) << 32)
                .wrapping_add(index as u64);
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            img = augmenter.augment(&img, &mut rng);
        }

        Ok(LeafItem {
            image: to_chw(&img),
            label: sample.label,
            path: sample.path.to_string_lossy().to_string(),
        })
    }
}

/// Batches of one epoch, see [`DirectoryGenerator::epoch`]
pub struct EpochBatches<'a> {
    generator: &'a DirectoryGenerator,
    order: Vec<usize>,
    epoch: usize,
    position: usize,
}

impl Iterator for EpochBatches<'_> {
    type Item = Result<Vec<LeafItem>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.order.len() {
            return None;
        }

        let end = (self.position + self.generator.config.batch_size).min(self.order.len());
        let indices = &self.order[self.position..end];
        self.position = end;

        Some(self.generator.load_batch(indices, self.epoch))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.order.len().saturating_sub(self.position);
        let batches = remaining.div_ceil(self.generator.config.batch_size);
        (batches, Some(batches))
    }
}

impl ExactSizeIterator for EpochBatches<'_> {}

/// Training, validation and test generators
pub type DataGenerators = (
    DirectoryGenerator,
    Option<DirectoryGenerator>,
    Option<DirectoryGenerator>,
);

/// Build the generators described by `config`
///
/// Training data is augmented and shuffled, validation data shuffled only,
/// test data kept in directory order. Validation and test generators reuse
/// the training class list and exist only when their directory does.
pub fn create_data_generators(config: &ProjectConfig) -> Result<DataGenerators> {
    let data = &config.data;
    if !data.train_dir.is_dir() {
        return Err(LeafError::DatasetNotFound(data.train_dir.clone()));
    }

    let base = GeneratorConfig::new(config.image_size(), config.model.batch_size)
        .with_seed(config.seed);

    let train = DirectoryGenerator::new(
        &data.train_dir,
        None,
        base.clone().with_augmentation(AugmentationConfig::default()),
    )?;
    if train.samples() == 0 {
        return Err(LeafError::InvalidInput(format!(
            "No images found in {}",
            data.train_dir.display()
        )));
    }

    if !config.classes.is_empty() && config.classes != train.class_names() {
        warn!(
            "Configured classes {:?} differ from directories {:?}; using directories",
            config.classes,
            train.class_names()
        );
    }

    let classes = train.class_names().to_vec();

    let valid = if data.valid_dir.is_dir() {
        Some(DirectoryGenerator::new(&data.valid_dir, Some(classes.as_slice()), base.clone())?)
    } else {
        None
    };

    let test = if data.test_dir.is_dir() {
        Some(DirectoryGenerator::new(
            &data.test_dir,
            Some(classes.as_slice()),
            base.with_shuffle(false),
        )?)
    } else {
        None
    };

    Ok((train, valid, test))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::test_utils::write_image_folder;

    fn project_config(root: &Path) -> ProjectConfig {
        let mut config = ProjectConfig::default();
        config.model.image_size = [8, 8];
        config.model.batch_size = 4;
        config.data.train_dir = root.join("train");
        config.data.valid_dir = root.join("valid");
        config.data.test_dir = root.join("test");
        config
    }

    #[test]
    fn test_batches_cover_every_sample_once() {
        let dir = tempfile::tempdir().unwrap();
        write_image_folder(dir.path(), &["healthy", "powdery", "rust"], &[3, 2, 5]);

        let generator =
            DirectoryGenerator::new(dir.path(), None, GeneratorConfig::new((8, 8), 4)).unwrap();
        assert_eq!(generator.samples(), 10);
        assert_eq!(generator.num_batches(), 3);

        let batches: Vec<_> = generator.epoch(0).map(|b| b.unwrap()).collect();
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![4, 4, 2]);

        let mut paths: Vec<String> = batches.into_iter().flatten().map(|i| i.path).collect();
        paths.sort();
        paths.dedup();
        assert_eq!(paths.len(), 10);
    }

    #[test]
    fn test_shuffle_is_seeded_per_epoch() {
        let dir = tempfile::tempdir().unwrap();
        write_image_folder(dir.path(), &["a", "b"], &[10, 10]);

        let generator =
            DirectoryGenerator::new(dir.path(), None, GeneratorConfig::new((8, 8), 4)).unwrap();

        assert_eq!(generator.order(0), generator.order(0));
        assert_ne!(generator.order(0), generator.order(1));

        let unshuffled = DirectoryGenerator::new(
            dir.path(),
            None,
            GeneratorConfig::new((8, 8), 4).with_shuffle(false),
        )
        .unwrap();
        assert_eq!(unshuffled.order(3), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_augmented_items_keep_shape_and_range() {
        let dir = tempfile::tempdir().unwrap();
        write_image_folder(dir.path(), &["healthy"], &[3]);

        let generator = DirectoryGenerator::new(
            dir.path(),
            None,
            GeneratorConfig::new((16, 8), 2).with_augmentation(AugmentationConfig::default()),
        )
        .unwrap();

        for batch in generator.epoch(0) {
            for item in batch.unwrap() {
                assert_eq!(item.image.len(), 3 * 16 * 8);
                assert!(item.image.iter().all(|v| (0.0..=1.0).contains(v)));
            }
        }
    }

    #[test]
    fn test_unreadable_image_fails_batch() {
        let dir = tempfile::tempdir().unwrap();
        write_image_folder(dir.path(), &["healthy"], &[1]);
        std::fs::write(dir.path().join("healthy/corrupt.jpg"), b"garbage").unwrap();

        let generator = DirectoryGenerator::new(
            dir.path(),
            None,
            GeneratorConfig::new((8, 8), 4).with_shuffle(false),
        )
        .unwrap();
        let err = generator.epoch(0).next().unwrap().unwrap_err();
        assert!(err.to_string().contains("corrupt.jpg"));
    }

    #[test]
    fn test_create_generators_with_all_splits() {
        let dir = tempfile::tempdir().unwrap();
        write_image_folder(&dir.path().join("train"), &["healthy", "rust"], &[4, 4]);
        write_image_folder(&dir.path().join("valid"), &["healthy", "rust"], &[2, 2]);
        write_image_folder(&dir.path().join("test"), &["healthy", "rust"], &[1, 1]);

        let (train, valid, test) = create_data_generators(&project_config(dir.path())).unwrap();
        let valid = valid.unwrap();
        let test = test.unwrap();

        assert_eq!(train.samples(), 8);
        assert_eq!(valid.samples(), 4);
        assert_eq!(test.samples(), 2);
        assert_eq!(valid.class_names(), train.class_names());
        assert!(train.augmenter.is_some());
        assert!(valid.augmenter.is_none());
        assert!(!test.config.shuffle);
    }

    #[test]
    fn test_create_generators_optional_splits() {
        let dir = tempfile::tempdir().unwrap();
        write_image_folder(&dir.path().join("train"), &["healthy"], &[2]);

        let (_, valid, test) = create_data_generators(&project_config(dir.path())).unwrap();
        assert!(valid.is_none());
        assert!(test.is_none());
    }

    #[test]
    fn test_create_generators_missing_train_dir() {
        let dir = tempfile::tempdir().unwrap();
        let err = create_data_generators(&project_config(dir.path())).unwrap_err();
        assert!(matches!(err, LeafError::DatasetNotFound(p) if p.ends_with("train")));
    }
}
