//! Image folder discovery and decoding
//!
//! Expects one subdirectory per class:
//!
//! ```text
//! data/train/
//! ├── healthy/
//! │   ├── leaf_001.jpg
//! │   └── ...
//! ├── powdery/
//! └── rust/
//! ```
//!
//! Class indices follow the sorted directory names.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::utils::error::{LeafError, Result};

/// File extensions treated as images (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "ppm", "tif", "tiff"];

/// A single image sample with its class label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSample {
    pub path: PathBuf,
    pub label: usize,
}

/// Samples discovered under a class-per-directory root
#[derive(Debug, Clone)]
pub struct ImageFolder {
    pub root: PathBuf,
    pub class_names: Vec<String>,
    pub samples: Vec<ImageSample>,
}

impl ImageFolder {
    /// Scan `dir` for images
    ///
    /// With `class_names` the label mapping is fixed by the caller and images
    /// under other directories are skipped. Without it the mapping is built
    /// from the sorted subdirectory names.
    pub fn scan<P: AsRef<Path>>(dir: P, class_names: Option<&[String]>) -> Result<Self> {
        let root = dir.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(LeafError::DatasetNotFound(root));
        }

        let found = class_directories(&root)?;
        let class_names: Vec<String> = match class_names {
            Some(names) => names.to_vec(),
            None => found.clone(),
        };

        let mut samples = Vec::new();
        for dir_name in &found {
            let Some(label) = class_names.iter().position(|c| c == dir_name) else {
                warn!(
                    "Skipping directory '{}' in {:?}: not a known class",
                    dir_name, root
                );
                continue;
            };

            let class_dir = root.join(dir_name);
            let mut paths: Vec<PathBuf> = WalkDir::new(&class_dir)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file() && is_image_file(e.path()))
                .map(|e| e.into_path())
                .collect();
            paths.sort();

            debug!("Class '{}' ({}): {} images", dir_name, label, paths.len());
            samples.extend(paths.into_iter().map(|path| ImageSample { path, label }));
        }

        Ok(Self {
            root,
            class_names,
            samples,
        })
    }

    /// Class name to index mapping
    pub fn class_indices(&self) -> BTreeMap<String, usize> {
        self.class_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect()
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of samples for each class index
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.class_names.len()];
        for sample in &self.samples {
            counts[sample.label] += 1;
        }
        counts
    }
}

/// Number of class subdirectories in `dir`, 0 if it does not exist
pub fn get_num_classes<P: AsRef<Path>>(dir: P) -> usize {
    let dir = dir.as_ref();
    if !dir.is_dir() {
        return 0;
    }
    class_directories(dir).map(|c| c.len()).unwrap_or(0)
}

/// Decode an image and resize it exactly to `(height, width)`
pub fn load_image<P: AsRef<Path>>(path: P, target_size: (u32, u32)) -> Result<DynamicImage> {
    let path = path.as_ref();
    let img = ImageReader::open(path)
        .map_err(|e| LeafError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .with_guessed_format()
        .map_err(|e| LeafError::ImageLoad(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| LeafError::ImageLoad(path.to_path_buf(), e.to_string()))?;

    Ok(resize_rgb(img, target_size))
}

/// Convert to RGB and resize exactly to `(height, width)` with bilinear filtering
pub fn resize_rgb(img: DynamicImage, (height, width): (u32, u32)) -> DynamicImage {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    if rgb.width() == width && rgb.height() == height {
        return rgb;
    }
    rgb.resize_exact(width, height, FilterType::Triangle)
}

/// CHW float buffer rescaled into `[0, 1]`
pub fn to_chw(img: &DynamicImage) -> Vec<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (i, pixel) in rgb.pixels().enumerate() {
        data[i] = pixel[0] as f32 / 255.0;
        data[plane + i] = pixel[1] as f32 / 255.0;
        data[2 * plane + i] = pixel[2] as f32 / 255.0;
    }

    data
}

fn class_directories(dir: &Path) -> Result<Vec<String>> {
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .collect();
    names.sort();
    Ok(names)
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::path::Path;

    use image::{ImageBuffer, Rgb};

    /// Write `counts[i]` small PNGs into `root/classes[i]/`
    pub fn write_image_folder(root: &Path, classes: &[&str], counts: &[usize]) {
        for (class_idx, (class, &count)) in classes.iter().zip(counts).enumerate() {
            let dir = root.join(class);
            std::fs::create_dir_all(&dir).unwrap();
            for i in 0..count {
                let img = ImageBuffer::from_fn(20, 12, |x, y| {
                    Rgb([(x * 10) as u8, (y * 20) as u8, (class_idx * 100) as u8])
                });
                img.save(dir.join(format!("img_{i:03}.png"))).unwrap();
            }
        }
    }
}
