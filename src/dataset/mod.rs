//! Dataset module for leaf image handling
//!
//! This module provides:
//! - Discovery of class-per-directory image folders
//! - Random affine augmentation for training
//! - A directory-backed batch generator for the fit loop
//! - Burn `Dataset`/`Batcher` integration

pub mod augmentation;
pub mod burn_dataset;
pub mod generator;
pub mod loader;

pub use augmentation::{AugmentationConfig, Augmenter};
pub use burn_dataset::{LeafBatch, LeafBatcher, LeafImageDataset, LeafItem};
pub use generator::{create_data_generators, DataGenerators, DirectoryGenerator, GeneratorConfig};
pub use loader::{get_num_classes, load_image, to_chw, ImageFolder, ImageSample};
