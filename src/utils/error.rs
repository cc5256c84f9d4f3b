//! Error Handling Module
//!
//! Defines the error type shared by the library.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for leaf disease operations
#[derive(Error, Debug)]
pub enum LeafError {
    /// Configuration could not be read, parsed or validated
    #[error("Configuration error: {0}")]
    Config(String),

    /// A dataset directory that must exist is missing
    #[error("Dataset directory '{0}' does not exist")]
    DatasetNotFound(PathBuf),

    /// Error loading or decoding an image file
    #[error("Failed to load image at '{0}': {1}")]
    ImageLoad(PathBuf, String),

    /// Error decoding in-memory image bytes
    #[error("Image decode error: {0}")]
    Image(#[from] image::ImageError),

    /// Error with model construction, saving or loading
    #[error("Model error: {0}")]
    Model(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// Error with inference
    #[error("Inference error: {0}")]
    Inference(String),

    /// Experiment tracking failure
    #[error("Tracking error: {0}")]
    Tracking(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience Result type for library operations
pub type Result<T> = std::result::Result<T, LeafError>;
