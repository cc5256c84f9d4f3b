//! Model module for the leaf disease CNN using the Burn framework
//!
//! This module provides:
//! - The CNN architecture and its configuration
//! - Compilation with Adam, cross-entropy and classification metrics
//! - A layer-by-layer summary
//! - Saving and loading of weights with metadata

pub mod cnn;
pub mod compile;
pub mod persistence;
pub mod summary;

// Re-export main types for convenience
pub use cnn::{create_cnn_model, LeafCnn, LeafCnnConfig};
pub use compile::{compile_model, CompiledModel, LossKind, MetricKind, StepOutput};
pub use persistence::{load_metadata, load_model, save_model, ModelMetadata};
pub use summary::ModelSummary;

/// Default number of output classes
pub const DEFAULT_NUM_CLASSES: usize = 4;
