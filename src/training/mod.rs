//! Training module for the leaf disease CNN
//!
//! This module provides:
//! - The epoch loop with validation (`trainer`)
//! - Early stopping and learning-rate reduction callbacks
//! - Local experiment tracking
//! - The end-to-end `train_model` pipeline

pub mod callbacks;
pub mod pipeline;
pub mod tracking;
pub mod trainer;

// Re-export main types for convenience
pub use callbacks::{
    EarlyStopping, EarlyStoppingConfig, Monitor, ReduceLrConfig, ReduceLrOnPlateau, StopSignal,
};
pub use pipeline::{run_training, train_model, TrainingOutcome};
pub use tracking::{ExperimentTracker, RunInfo, RunStatus};
pub use trainer::{evaluate, EpochRecord, FitConfig, History, Trainer};
