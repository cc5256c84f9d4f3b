//! Inference module for single-image prediction
//!
//! Used by the `predict` CLI command and by the REST server.

pub mod predictor;

// Re-export main types for convenience
pub use predictor::{Prediction, Predictor};
