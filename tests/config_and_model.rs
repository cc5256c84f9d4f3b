//! Checks the shipped configuration file and model construction

use std::path::PathBuf;

use burn::backend::Autodiff;
use burn::tensor::Tensor;
use burn_ndarray::NdArray;

use leaf_disease::config::{ProjectConfig, DEFAULT_CONFIG_PATH};
use leaf_disease::model::{
    compile_model, create_cnn_model, LossKind, MetricKind, ModelSummary, DEFAULT_NUM_CLASSES,
};
use leaf_disease::LeafCnnConfig;

type TestBackend = NdArray;

fn shipped_config() -> ProjectConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
    ProjectConfig::load(path).expect("config/config.toml should parse")
}

#[test]
fn test_load_config() {
    let config = shipped_config();
    config.validate().unwrap();
    assert!(!config.classes.is_empty());
    assert_eq!(config.output.model_path(), PathBuf::from("models/cnn_model"));
}

#[test]
fn test_config_values() {
    let config = shipped_config();
    assert!(config.model.batch_size > 0);
    assert!(config.model.epochs > 0);
    assert!(config.model.learning_rate > 0.0);
    assert_eq!(config.model.image_size.len(), 2);
}

#[test]
fn test_create_model() {
    let device = Default::default();
    let model = create_cnn_model::<TestBackend>((32, 32, 3), DEFAULT_NUM_CLASSES, &device);
    assert_eq!(model.num_classes(), DEFAULT_NUM_CLASSES);

    let output = model.forward(Tensor::zeros([1, 3, 32, 32], &device));
    assert_eq!(output.dims(), [1, DEFAULT_NUM_CLASSES]);

    let summary = ModelSummary::from_config(
        &LeafCnnConfig::new()
            .with_input_size([32, 32])
            .with_num_classes(DEFAULT_NUM_CLASSES),
    );
    assert!(!summary.layers.is_empty());
    assert!(summary.total_params() > 0);
}

#[test]
fn test_compile_model() {
    let device = Default::default();
    let model = create_cnn_model::<Autodiff<TestBackend>>((16, 16, 3), 4, &device);
    let compiled = compile_model(model, 0.001);

    assert_eq!(compiled.loss, LossKind::CategoricalCrossentropy);
    assert_eq!(
        compiled.metrics,
        vec![MetricKind::Accuracy, MetricKind::Precision, MetricKind::Recall]
    );
    assert_eq!(compiled.learning_rate, 0.001);
}
