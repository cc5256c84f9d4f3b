//! Application state for the inference server
//!
//! Holds the loaded predictor (if loading succeeded) and the metrics.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use leaf_disease::backend::{default_device, DefaultBackend};
use leaf_disease::inference::{Prediction, Predictor};
use tracing::{error, info};

use crate::error::ApiError;
use crate::metrics::ServiceMetrics;

/// Class names used when neither the model nor the command line provides any
pub const DEFAULT_CLASS_NAMES: &[&str] = &["healthy", "powdery", "rust"];

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Saved model stem, `.mpk` or `.json` path
    pub model_path: PathBuf,
    /// Overrides the class names stored with the model
    pub class_names: Option<Vec<String>>,
}

/// Shared application state
pub struct AppState {
    /// `None` when the model failed to load at startup
    predictor: Option<Mutex<Predictor<DefaultBackend>>>,
    pub metrics: ServiceMetrics,
    /// Server start time
    pub started_at: Instant,
}

impl AppState {
    pub fn new(predictor: Option<Predictor<DefaultBackend>>, metrics: ServiceMetrics) -> Self {
        Self {
            predictor: predictor.map(Mutex::new),
            metrics,
            started_at: Instant::now(),
        }
    }

    /// Load the model described by `config`; failures are logged, not returned
    pub fn load(config: &ServerConfig, metrics: ServiceMetrics) -> Self {
        let predictor = match load_predictor(&config.model_path, config.class_names.clone()) {
            Ok(predictor) => {
                info!(
                    "Model loaded from {:?} with classes {:?}",
                    config.model_path,
                    predictor.class_names()
                );
                Some(predictor)
            }
            Err(e) => {
                error!("Error loading model: {}", e);
                None
            }
        };
        Self::new(predictor, metrics)
    }

    pub fn model_loaded(&self) -> bool {
        self.predictor.is_some()
    }

    /// Decode `bytes` and run the model; blocks the calling thread
    pub fn predict(&self, bytes: &[u8]) -> Result<Prediction, ApiError> {
        let predictor = self.predictor.as_ref().ok_or(ApiError::ModelNotLoaded)?;
        let predictor = predictor
            .lock()
            .map_err(|_| ApiError::Internal("Predictor lock poisoned".into()))?;
        predictor
            .predict_bytes(bytes)
            .map_err(|e| ApiError::Prediction(e.to_string()))
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;

fn load_predictor(
    model_path: &Path,
    class_names: Option<Vec<String>>,
) -> leaf_disease::Result<Predictor<DefaultBackend>> {
    let predictor = Predictor::<DefaultBackend>::load(model_path, default_device())?;

    let class_names = match class_names {
        Some(names) => names,
        None if predictor.class_names().is_empty() => {
            DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()
        }
        None => return Ok(predictor),
    };
    Ok(predictor.with_class_names(class_names))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_not_fatal() {
        let dir = std::env::temp_dir().join("leaf_disease_server_missing_model");
        let config = ServerConfig {
            model_path: dir.join("cnn_model"),
            class_names: None,
        };

        let state = AppState::load(&config, ServiceMetrics::new().unwrap());
        assert!(!state.model_loaded());
        assert!(matches!(state.predict(b"bytes"), Err(ApiError::ModelNotLoaded)));
    }
}
