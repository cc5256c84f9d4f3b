//! Inference Predictor Module
//!
//! Runs a trained [`LeafCnn`] on single images. Preprocessing matches the
//! training pipeline: RGB, exact resize to the model's input size, values
//! rescaled into `[0, 1]`, CHW layout with a batch dimension of one.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use burn::prelude::*;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::loader::{load_image, resize_rgb, to_chw};
use crate::model::{load_model, LeafCnn, ModelMetadata};
use crate::utils::error::{LeafError, Result};
use crate::utils::metrics::argmax;

/// Result of a single prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Predicted class name
    pub class: String,

    /// Predicted class index
    pub class_index: usize,

    /// Probability of the predicted class
    pub confidence: f32,

    /// Forward pass time in milliseconds (preprocessing excluded)
    pub inference_time_ms: f64,

    /// Full probability distribution over all classes
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Build from a probability vector; the argmax must have a class name
    pub fn from_probabilities(
        probabilities: Vec<f32>,
        class_names: &[String],
        inference_time: Duration,
    ) -> Result<Self> {
        // Same tie-breaking as evaluation: the first maximum wins
        let class_index = argmax(&probabilities)
            .ok_or_else(|| LeafError::Inference("Model produced no outputs".into()))?;
        let confidence = probabilities[class_index];

        let class = class_names.get(class_index).cloned().ok_or_else(|| {
            LeafError::Inference(format!(
                "Predicted class index {} has no name ({} class names known)",
                class_index,
                class_names.len()
            ))
        })?;

        Ok(Self {
            class,
            class_index,
            confidence,
            inference_time_ms: inference_time.as_secs_f64() * 1000.0,
            probabilities,
        })
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Prediction: {} (class {})", self.class, self.class_index)?;
        writeln!(f, "Confidence: {:.2}%", self.confidence * 100.0)?;
        write!(f, "Inference time: {:.2} ms", self.inference_time_ms)
    }
}

/// A loaded model ready for prediction
pub struct Predictor<B: Backend> {
    model: LeafCnn<B>,
    metadata: ModelMetadata,
    class_names: Vec<String>,
    device: B::Device,
}

impl<B: Backend> Predictor<B> {
    pub fn new(model: LeafCnn<B>, metadata: ModelMetadata, device: B::Device) -> Self {
        let class_names = metadata.class_names.clone();
        Self {
            model,
            metadata,
            class_names,
            device,
        }
    }

    /// Load weights and metadata saved with [`crate::model::save_model`]
    pub fn load<P: AsRef<Path>>(path: P, device: B::Device) -> Result<Self> {
        let (model, metadata) = load_model::<B, _>(path, &device)?;
        Ok(Self::new(model, metadata, device))
    }

    /// Replace the class names stored with the model
    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = class_names;
        self
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// `(height, width)` the model expects
    pub fn image_size(&self) -> (u32, u32) {
        let [height, width] = self.metadata.image_size;
        (height as u32, width as u32)
    }

    /// Image to a `[1, 3, H, W]` tensor
    pub fn preprocess(&self, image: &DynamicImage) -> Tensor<B, 4> {
        let (height, width) = self.image_size();
        let resized = resize_rgb(image.clone(), (height, width));
        Tensor::<B, 4>::from_floats(
            TensorData::new(to_chw(&resized), [1, 3, height as usize, width as usize]),
            &self.device,
        )
    }

    pub fn predict_image(&self, image: &DynamicImage) -> Result<Prediction> {
        let input = self.preprocess(image);

        let start = Instant::now();
        let probabilities = self
            .model
            .forward_softmax(input)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| LeafError::Inference(format!("Failed to read model output: {:?}", e)))?;
        let elapsed = start.elapsed();

        let prediction = Prediction::from_probabilities(probabilities, &self.class_names, elapsed)?;
        debug!(
            "Predicted {} ({:.3}) in {:.2} ms",
            prediction.class, prediction.confidence, prediction.inference_time_ms
        );
        Ok(prediction)
    }

    /// Decode an encoded image (PNG, JPEG, ...) and predict
    pub fn predict_bytes(&self, bytes: &[u8]) -> Result<Prediction> {
        let image = image::load_from_memory(bytes)?;
        self.predict_image(&image)
    }

    pub fn predict_file<P: AsRef<Path>>(&self, path: P) -> Result<Prediction> {
        let image = load_image(path, self.image_size())?;
        self.predict_image(&image)
    }

    /// Predict every file in `paths`, keeping failures per file
    pub fn predict_files(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<Prediction>)> {
        paths
            .iter()
            .map(|path| (path.clone(), self.predict_file(path)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{save_model, LeafCnnConfig};
    use burn_ndarray::NdArray;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    type TestBackend = NdArray;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn predictor(class_names: &[&str]) -> Predictor<TestBackend> {
        let device = Default::default();
        let config = LeafCnnConfig::new()
            .with_num_classes(3)
            .with_input_size([16, 16]);
        let model = config.init::<TestBackend>(&device);
        Predictor::new(model, ModelMetadata::new(&config, names(class_names)), device)
    }

    fn test_image() -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(40, 30, |x, y| {
            Rgb([(x * 6) as u8, (y * 8) as u8, 90])
        }))
    }

    #[test]
    fn test_prediction_from_probabilities() {
        let prediction = Prediction::from_probabilities(
            vec![0.1, 0.7, 0.2],
            &names(&["healthy", "powdery", "rust"]),
            Duration::from_millis(12),
        )
        .unwrap();

        assert_eq!(prediction.class, "powdery");
        assert_eq!(prediction.class_index, 1);
        assert_eq!(prediction.confidence, 0.7);
        assert!((prediction.inference_time_ms - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_prediction_ties_pick_first_class() {
        let probabilities = vec![0.4, 0.4, 0.2];
        let prediction = Prediction::from_probabilities(
            probabilities.clone(),
            &names(&["healthy", "powdery", "rust"]),
            Duration::ZERO,
        )
        .unwrap();

        assert_eq!(prediction.class_index, 0);
        assert_eq!(prediction.class, "healthy");
        assert_eq!(Some(prediction.class_index), argmax(&probabilities));
    }

    #[test]
    fn test_prediction_unknown_index_is_error() {
        let err = Prediction::from_probabilities(
            vec![0.1, 0.2, 0.7],
            &names(&["healthy", "powdery"]),
            Duration::ZERO,
        )
        .unwrap_err();
        assert!(matches!(err, LeafError::Inference(_)));
    }

    #[test]
    fn test_preprocess_shape_and_range() {
        let predictor = predictor(&["healthy", "powdery", "rust"]);
        let tensor = predictor.preprocess(&test_image());
        assert_eq!(tensor.dims(), [1, 3, 16, 16]);

        let values = tensor.into_data().to_vec::<f32>().unwrap();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_predict_image_distribution() {
        let predictor = predictor(&["healthy", "powdery", "rust"]);
        let prediction = predictor.predict_image(&test_image()).unwrap();

        assert_eq!(prediction.probabilities.len(), 3);
        let sum: f32 = prediction.probabilities.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert_eq!(
            prediction.confidence,
            prediction.probabilities[prediction.class_index]
        );
        assert_eq!(
            prediction.class,
            predictor.class_names()[prediction.class_index]
        );
    }

    #[test]
    fn test_predict_bytes_and_override_names() {
        let predictor =
            predictor(&[]).with_class_names(names(&["healthy", "powdery", "rust"]));

        let mut bytes = Vec::new();
        test_image()
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let prediction = predictor.predict_bytes(&bytes).unwrap();
        assert!(["healthy", "powdery", "rust"].contains(&prediction.class.as_str()));
    }

    #[test]
    fn test_predict_bytes_rejects_garbage() {
        let predictor = predictor(&["healthy", "powdery", "rust"]);
        assert!(predictor.predict_bytes(b"not an image").is_err());
    }

    #[test]
    fn test_load_saved_model() {
        let dir = tempfile::tempdir().unwrap();
        let source = predictor(&["healthy", "powdery", "rust"]);
        let stem = save_model(&source.model, source.metadata(), dir.path(), "cnn_model").unwrap();

        let loaded = Predictor::<TestBackend>::load(&stem, Default::default()).unwrap();
        assert_eq!(loaded.class_names(), source.class_names());
        assert_eq!(loaded.image_size(), (16, 16));

        let a = source.predict_image(&test_image()).unwrap();
        let b = loaded.predict_image(&test_image()).unwrap();
        assert_eq!(a.probabilities.len(), b.probabilities.len());
    }
}
