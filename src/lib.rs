//! # Leaf Disease Classifier
//!
//! A Rust library for plant leaf disease classification using the Burn framework.
//!
//! ## Modules
//!
//! - `config`: TOML project configuration
//! - `dataset`: Directory-based image generators with on-the-fly augmentation
//! - `model`: CNN architecture, compilation, summary and persistence
//! - `training`: Fit loop, callbacks, experiment tracking and the training pipeline
//! - `inference`: Single-image prediction
//! - `utils`: Logging, metrics, and error types
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use leaf_disease::backend::{default_device, TrainingBackend};
//! use leaf_disease::training::train_model;
//!
//! let outcome = train_model::<TrainingBackend>("config/config.toml".as_ref(), default_device())?;
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inference;
pub mod model;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::ProjectConfig;
pub use dataset::{create_data_generators, DirectoryGenerator, GeneratorConfig};
pub use inference::{Prediction, Predictor};
pub use model::{create_cnn_model, LeafCnn, LeafCnnConfig};
pub use training::{train_model, Trainer};
pub use utils::error::{LeafError, Result};
pub use utils::metrics::EvaluationMetrics;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
