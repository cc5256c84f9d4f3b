//! Project Configuration
//!
//! The project is driven by a single TOML file (`config/config.toml` by
//! default). Every field has a default, so partial files are accepted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::error::{LeafError, Result};

/// Default location of the project configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Top-level project configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectConfig {
    pub seed: u64,
    /// Class names expected in the dataset. The authoritative list is
    /// discovered from the training directory.
    pub classes: Vec<String>,
    pub model: ModelSection,
    pub data: DataSection,
    pub tracking: TrackingSection,
    pub output: OutputSection,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            classes: Vec::new(),
            model: ModelSection::default(),
            data: DataSection::default(),
            tracking: TrackingSection::default(),
            output: OutputSection::default(),
        }
    }
}

/// Model and optimisation hyperparameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSection {
    /// Input size as `[height, width]`
    pub image_size: [u32; 2],
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            image_size: [224, 224],
            batch_size: 32,
            epochs: 50,
            learning_rate: 0.001,
        }
    }
}

/// Dataset directories, one subdirectory per class
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DataSection {
    pub train_dir: PathBuf,
    pub valid_dir: PathBuf,
    pub test_dir: PathBuf,
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            train_dir: PathBuf::from("data/train"),
            valid_dir: PathBuf::from("data/valid"),
            test_dir: PathBuf::from("data/test"),
        }
    }
}

/// Local experiment tracking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackingSection {
    pub experiment_name: String,
    pub tracking_dir: PathBuf,
}

impl Default for TrackingSection {
    fn default() -> Self {
        Self {
            experiment_name: "leaf-disease-classification".to_string(),
            tracking_dir: PathBuf::from("mlruns"),
        }
    }
}

/// Where the trained model is written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSection {
    pub model_dir: PathBuf,
    pub model_name: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("models"),
            model_name: "cnn_model".to_string(),
        }
    }
}

impl OutputSection {
    /// Model path without extension (recorder and metadata add their own)
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_name)
    }
}

impl ProjectConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            LeafError::Config(format!("Failed to read config {}: {e}", path.display()))
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| {
            LeafError::Config(format!("Failed to parse config {}: {e}", path.display()))
        })?;

        debug!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration as TOML
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| LeafError::Config(format!("Failed to serialize config: {e}")))?;
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate hyperparameters
    pub fn validate(&self) -> Result<()> {
        let model = &self.model;

        if model.batch_size == 0 {
            return Err(LeafError::Config("batch_size must be greater than 0".into()));
        }

        if model.epochs == 0 {
            return Err(LeafError::Config("epochs must be greater than 0".into()));
        }

        if !(model.learning_rate > 0.0) {
            return Err(LeafError::Config("learning_rate must be positive".into()));
        }

        // Three 2x2 max-pools halve each side three times.
        for side in model.image_size {
            if side == 0 || side % 8 != 0 {
                return Err(LeafError::Config(format!(
                    "image_size entries must be positive multiples of 8, got {:?}",
                    model.image_size
                )));
            }
        }

        Ok(())
    }

    /// Image size as `(height, width)`
    pub fn image_size(&self) -> (u32, u32) {
        (self.model.image_size[0], self.model.image_size[1])
    }
}

/// Load configuration from [`DEFAULT_CONFIG_PATH`]
pub fn load_config() -> Result<ProjectConfig> {
    ProjectConfig::load(DEFAULT_CONFIG_PATH)
}
