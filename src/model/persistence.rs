//! Saving and loading trained models
//!
//! A saved model is two files sharing a stem: `<name>.mpk` holds the weights
//! written by burn's `CompactRecorder`, `<name>.json` holds
//! [`ModelMetadata`].

use std::fs;
use std::path::{Path, PathBuf};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::cnn::{LeafCnn, LeafCnnConfig};
use crate::utils::error::{LeafError, Result};

/// Extension added by `CompactRecorder`
pub const WEIGHTS_EXTENSION: &str = "mpk";

/// Extension of the metadata sidecar
pub const METADATA_EXTENSION: &str = "json";

/// Everything needed to rebuild and interpret a saved model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub config: LeafCnnConfig,
    pub class_names: Vec<String>,
    /// `[height, width]`
    pub image_size: [usize; 2],
    pub num_classes: usize,
    pub created_at: DateTime<Utc>,
    /// Crate version that wrote the model
    pub framework_version: String,
}

impl ModelMetadata {
    pub fn new(config: &LeafCnnConfig, class_names: Vec<String>) -> Self {
        Self {
            config: config.clone(),
            class_names,
            image_size: config.input_size,
            num_classes: config.num_classes,
            created_at: Utc::now(),
            framework_version: crate::VERSION.to_string(),
        }
    }
}

/// Strip a `.mpk`/`.json` extension so either file or the bare stem can be passed
pub fn model_stem<P: AsRef<Path>>(path: P) -> PathBuf {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some(WEIGHTS_EXTENSION) | Some(METADATA_EXTENSION) => path.with_extension(""),
        _ => path.to_path_buf(),
    }
}

/// Write weights and metadata to `dir/name.{mpk,json}`, returning the stem
pub fn save_model<B: Backend>(
    model: &LeafCnn<B>,
    metadata: &ModelMetadata,
    dir: &Path,
    name: &str,
) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let stem = dir.join(name);

    model
        .clone()
        .save_file(&stem, &CompactRecorder::new())
        .map_err(|e| LeafError::Model(format!("Failed to save model to {:?}: {:?}", stem, e)))?;

    let json = serde_json::to_string_pretty(metadata)?;
    fs::write(stem.with_extension(METADATA_EXTENSION), json)?;

    info!("Model saved to {:?}", stem);
    Ok(stem)
}

/// Read only the metadata of a saved model
pub fn load_metadata<P: AsRef<Path>>(path: P) -> Result<ModelMetadata> {
    let meta_path = model_stem(path).with_extension(METADATA_EXTENSION);
    let content = fs::read_to_string(&meta_path).map_err(|e| {
        LeafError::Model(format!("Failed to read model metadata {:?}: {}", meta_path, e))
    })?;
    Ok(serde_json::from_str(&content)?)
}

/// Restore a model saved with [`save_model`]
pub fn load_model<B: Backend, P: AsRef<Path>>(
    path: P,
    device: &B::Device,
) -> Result<(LeafCnn<B>, ModelMetadata)> {
    let stem = model_stem(path);
    let metadata = load_metadata(&stem)?;

    let weights = stem.with_extension(WEIGHTS_EXTENSION);
    if !weights.exists() {
        return Err(LeafError::Model(format!("Model weights not found: {:?}", weights)));
    }

    let model = metadata
        .config
        .init::<B>(device)
        .load_file(&stem, &CompactRecorder::new(), device)
        .map_err(|e| LeafError::Model(format!("Failed to load model from {:?}: {:?}", stem, e)))?;

    info!(
        "Loaded model {:?} ({} classes, input {:?})",
        stem, metadata.num_classes, metadata.image_size
    );
    Ok((model, metadata))
}
