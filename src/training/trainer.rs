//! Fit loop and evaluation
//!
//! This module implements the epoch loop using the Burn framework:
//! - Forward/backward passes with automatic differentiation
//! - Cross-entropy loss and Adam updates through [`CompiledModel`]
//! - Validation after every epoch on the inner (non-autodiff) backend
//! - Early stopping and learning-rate reduction on plateau

use std::collections::BTreeMap;

use burn::{
    data::dataloader::batcher::Batcher,
    module::Module,
    nn::loss::CrossEntropyLossConfig,
    optim::Optimizer,
    tensor::{activation::softmax, backend::AutodiffBackend, backend::Backend, ElementConversion},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{DirectoryGenerator, LeafBatch, LeafBatcher};
use crate::model::cnn::LeafCnnRecord;
use crate::model::{CompiledModel, LeafCnn};
use crate::training::callbacks::{
    EarlyStopping, EarlyStoppingConfig, Monitor, ReduceLrConfig, ReduceLrOnPlateau, StopSignal,
};
use crate::training::tracking::ExperimentTracker;
use crate::utils::error::{LeafError, Result};
use crate::utils::logging::TrainingLogger;
use crate::utils::metrics::{ClassificationCounts, EvaluationMetrics};

/// Metrics of one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    /// Learning rate used during the epoch
    pub lr: f64,
}

impl EpochRecord {
    /// Value of `monitor`, falling back to training loss without validation
    pub fn monitored(&self, monitor: Monitor) -> f64 {
        match monitor {
            Monitor::ValLoss => self.val_loss.unwrap_or(self.loss),
            Monitor::Loss => self.loss,
        }
    }

    /// Flat metric map for experiment tracking
    pub fn to_metrics(&self) -> BTreeMap<String, f64> {
        let mut metrics = BTreeMap::from([
            ("loss".to_string(), self.loss),
            ("accuracy".to_string(), self.accuracy),
            ("lr".to_string(), self.lr),
        ]);
        if let Some(v) = self.val_loss {
            metrics.insert("val_loss".to_string(), v);
        }
        if let Some(v) = self.val_accuracy {
            metrics.insert("val_accuracy".to_string(), v);
        }
        metrics
    }
}

/// Per-epoch records of a fit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochRecord>,
    /// Epoch at which early stopping fired
    pub stopped_epoch: Option<usize>,
    /// Epoch whose weights the model ended with, when they were restored
    pub restored_epoch: Option<usize>,
}

impl History {
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.epochs.last()
    }

    pub fn losses(&self) -> Vec<f64> {
        self.epochs.iter().map(|e| e.loss).collect()
    }

    pub fn val_losses(&self) -> Vec<Option<f64>> {
        self.epochs.iter().map(|e| e.val_loss).collect()
    }
}

/// Settings of a fit
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub epochs: usize,
    pub early_stopping: Option<EarlyStoppingConfig>,
    pub reduce_lr: Option<ReduceLrConfig>,
}

impl FitConfig {
    /// Early stopping and plateau reduction with their default settings
    pub fn new(epochs: usize) -> Self {
        Self {
            epochs,
            early_stopping: Some(EarlyStoppingConfig::default()),
            reduce_lr: Some(ReduceLrConfig::default()),
        }
    }

    pub fn without_callbacks(epochs: usize) -> Self {
        Self {
            epochs,
            early_stopping: None,
            reduce_lr: None,
        }
    }
}

/// Drives a [`CompiledModel`] through training epochs
pub struct Trainer<B: AutodiffBackend, O> {
    pub compiled: CompiledModel<B, O>,
    pub config: FitConfig,
    device: B::Device,
}

impl<B, O> Trainer<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<LeafCnn<B>, B>,
{
    pub fn new(compiled: CompiledModel<B, O>, config: FitConfig, device: B::Device) -> Self {
        Self {
            compiled,
            config,
            device,
        }
    }

    /// Train on `train`, validating on `valid` after each epoch
    ///
    /// Each epoch's record is logged to `tracker` as step metrics when given.
    pub fn fit(
        &mut self,
        train: &DirectoryGenerator,
        valid: Option<&DirectoryGenerator>,
        mut tracker: Option<&mut ExperimentTracker>,
    ) -> Result<History> {
        let mut history = History::default();
        let mut logger = TrainingLogger::new(self.config.epochs);
        let mut early_stopping = self.config.early_stopping.clone().map(EarlyStopping::new);
        let mut reduce_lr = self.config.reduce_lr.clone().map(ReduceLrOnPlateau::new);
        // Records, not clones: a cloned module shares its batch-norm running statistics
        let mut best_record: Option<LeafCnnRecord<B>> = None;

        let batcher = LeafBatcher::new(train.target_size());

        for epoch in 0..self.config.epochs {
            logger.start_epoch(epoch);
            let lr = self.compiled.learning_rate;

            let mut loss_sum = 0.0;
            let mut correct = 0usize;
            let mut seen = 0usize;
            let num_batches = train.num_batches();

            for (batch_idx, items) in train.epoch(epoch).enumerate() {
                let batch: LeafBatch<B> = batcher.batch(items?, &self.device);
                let step = self.compiled.train_step(batch);

                loss_sum += step.loss * step.samples as f64;
                correct += step.correct;
                seen += step.samples;

                if (batch_idx + 1) % 10 == 0 || batch_idx + 1 == num_batches {
                    debug!(
                        "  Batch {}/{}: loss = {:.4}, acc = {:.2}%",
                        batch_idx + 1,
                        num_batches,
                        step.loss,
                        100.0 * correct as f64 / seen.max(1) as f64
                    );
                }
            }

            if seen == 0 {
                return Err(LeafError::Training("Training generator produced no samples".into()));
            }

            let (val_loss, val_accuracy) = match valid {
                Some(generator) => {
                    let metrics = evaluate(&self.compiled.valid_model(), generator, &self.device)?;
                    (Some(metrics.loss), Some(metrics.accuracy))
                }
                None => (None, None),
            };

            let record = EpochRecord {
                epoch,
                loss: loss_sum / seen as f64,
                accuracy: correct as f64 / seen as f64,
                val_loss,
                val_accuracy,
                lr,
            };
            logger.end_epoch(record.loss, record.val_loss, lr);

            if let Some(tracker) = tracker.as_deref_mut() {
                tracker.log_metrics(&record.to_metrics(), Some(epoch))?;
            }

            if let Some(plateau) = reduce_lr.as_mut() {
                let value = record.monitored(plateau.config.monitor);
                if let Some(new_lr) = plateau.update(value, self.compiled.learning_rate) {
                    self.compiled.set_learning_rate(new_lr);
                }
            }

            let signal = early_stopping
                .as_mut()
                .map(|es| es.update(epoch, record.monitored(es.config.monitor)));
            history.epochs.push(record);

            match signal {
                Some(StopSignal::Improved) => {
                    if self.restores_best_weights() {
                        best_record = Some(self.compiled.model.clone().into_record());
                    }
                }
                Some(StopSignal::Stop) => {
                    history.stopped_epoch = Some(epoch);
                    if let Some(patience) = self.config.early_stopping.as_ref().map(|c| c.patience) {
                        logger.log_early_stop(patience);
                    }
                    if let Some(best) = best_record.take() {
                        self.compiled.model = self.compiled.model.clone().load_record(best);
                        history.restored_epoch = early_stopping.as_ref().and_then(|es| es.best_epoch());
                    }
                    break;
                }
                Some(StopSignal::Continue) | None => {}
            }
        }

        logger.log_complete(history.len());
        Ok(history)
    }

    fn restores_best_weights(&self) -> bool {
        self.config
            .early_stopping
            .as_ref()
            .is_some_and(|c| c.restore_best_weights)
    }

    pub fn device(&self) -> &B::Device {
        &self.device
    }

    pub fn model(&self) -> &LeafCnn<B> {
        &self.compiled.model
    }

    pub fn into_model(self) -> LeafCnn<B> {
        self.compiled.model
    }
}

/// Loss, accuracy, precision and recall of `model` over one pass of `generator`
///
/// Run on a non-autodiff backend so dropout and batch norm are in inference mode.
pub fn evaluate<B: Backend>(
    model: &LeafCnn<B>,
    generator: &DirectoryGenerator,
    device: &B::Device,
) -> Result<EvaluationMetrics> {
    let batcher = LeafBatcher::new(generator.target_size());
    let num_classes = model.num_classes();
    let mut counts = ClassificationCounts::new();
    let mut loss_sum = 0.0;

    for items in generator.epoch(0) {
        let items = items?;
        let labels: Vec<usize> = items.iter().map(|i| i.label).collect();
        let batch: LeafBatch<B> = batcher.batch(items, device);

        let logits = model.forward(batch.images);
        let loss: f64 = CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits.clone(), batch.targets)
            .into_scalar()
            .elem();
        loss_sum += loss * labels.len() as f64;

        let probabilities = softmax(logits, 1)
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| LeafError::Training(format!("Failed to read predictions: {:?}", e)))?;
        counts.update(&probabilities, &labels, num_classes);
    }

    let loss = if counts.samples > 0 {
        loss_sum / counts.samples as f64
    } else {
        0.0
    };
    Ok(counts.finish(loss))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::loader::test_utils::write_image_folder;
    use crate::dataset::GeneratorConfig;
    use crate::model::{compile_model, LeafCnnConfig};
    use burn::backend::Autodiff;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;

    type TestBackend = Autodiff<NdArray>;

    fn record(epoch: usize, loss: f64, val_loss: Option<f64>) -> EpochRecord {
        EpochRecord {
            epoch,
            loss,
            accuracy: 0.5,
            val_loss,
            val_accuracy: val_loss.map(|_| 0.5),
            lr: 0.001,
        }
    }

    #[test]
    fn test_monitor_falls_back_to_loss() {
        assert_eq!(record(0, 0.7, Some(0.9)).monitored(Monitor::ValLoss), 0.9);
        assert_eq!(record(0, 0.7, None).monitored(Monitor::ValLoss), 0.7);
        assert_eq!(record(0, 0.7, Some(0.9)).monitored(Monitor::Loss), 0.7);
    }

    #[test]
    fn test_record_metrics_map() {
        let metrics = record(3, 0.4, Some(0.6)).to_metrics();
        assert_eq!(metrics["loss"], 0.4);
        assert_eq!(metrics["val_loss"], 0.6);
        assert!(metrics.contains_key("lr"));

        assert!(!record(3, 0.4, None).to_metrics().contains_key("val_loss"));
    }

    #[test]
    fn test_fit_and_evaluate_on_tiny_dataset() {
        let dir = tempfile::tempdir().unwrap();
        write_image_folder(&dir.path().join("train"), &["healthy", "rust"], &[4, 4]);
        write_image_folder(&dir.path().join("valid"), &["healthy", "rust"], &[2, 2]);

        let gen_config = GeneratorConfig::new((8, 8), 4);
        let train = DirectoryGenerator::new(dir.path().join("train"), None, gen_config.clone()).unwrap();
        let valid = DirectoryGenerator::new(
            dir.path().join("valid"),
            Some(train.class_names()),
            gen_config,
        )
        .unwrap();

        let device = Default::default();
        let model = LeafCnnConfig::new()
            .with_input_size([8, 8])
            .with_num_classes(2)
            .init::<TestBackend>(&device);
        let mut trainer =
            Trainer::new(compile_model(model, 0.001), FitConfig::new(2), device.clone());

        let mut tracker = ExperimentTracker::new(dir.path().join("mlruns"), "test");
        tracker.start_run().unwrap();

        let history = trainer.fit(&train, Some(&valid), Some(&mut tracker)).unwrap();
        assert_eq!(history.len(), 2);
        assert!(history.epochs.iter().all(|e| e.loss.is_finite()));
        assert!(history.epochs.iter().all(|e| e.val_loss.is_some()));

        let metrics = evaluate(&trainer.compiled.valid_model(), &valid, &device).unwrap();
        assert_eq!(metrics.samples, 4);
        assert!((0.0..=1.0).contains(&metrics.accuracy));
        assert!(metrics.loss.is_finite());

        let logged = std::fs::read_to_string(tracker.run_dir().unwrap().join("metrics.jsonl")).unwrap();
        assert!(logged.contains("val_loss"));
    }

    /// Outputs on a fixed input in inference mode
    fn fixed_outputs<O>(trainer: &Trainer<TestBackend, O>) -> Vec<f32>
    where
        O: Optimizer<LeafCnn<TestBackend>, TestBackend>,
    {
        let input = Tensor::<NdArray, 4>::ones([2, 3, 8, 8], trainer.device()).mul_scalar(0.5);
        trainer
            .compiled
            .valid_model()
            .forward(input)
            .into_data()
            .to_vec::<f32>()
            .unwrap()
    }

    #[test]
    fn test_early_stopping_restores_best_epoch() {
        let dir = tempfile::tempdir().unwrap();
        write_image_folder(dir.path(), &["healthy", "rust"], &[2, 2]);
        let train =
            DirectoryGenerator::new(dir.path(), None, GeneratorConfig::new((8, 8), 4)).unwrap();

        let device = Default::default();
        let model_config = LeafCnnConfig::new()
            .with_input_size([8, 8])
            .with_num_classes(2)
            .with_conv_dropout(0.0)
            .with_dense_dropout(0.0);
        let initial = model_config.init::<TestBackend>(&device);
        // Separate init so the two models do not share batch-norm statistics
        let same_weights = || {
            model_config
                .init::<TestBackend>(&device)
                .load_record(initial.clone().into_record())
        };

        // Weights after exactly one epoch
        let mut reference = Trainer::new(
            compile_model(same_weights(), 0.01),
            FitConfig::without_callbacks(1),
            device.clone(),
        );
        reference.fit(&train, None, None).unwrap();
        let best_outputs = fixed_outputs(&reference);

        // A huge min_delta means only the first epoch ever improves
        let config = FitConfig {
            epochs: 5,
            early_stopping: Some(EarlyStoppingConfig {
                patience: 1,
                min_delta: 1e9,
                ..Default::default()
            }),
            reduce_lr: None,
        };
        let mut trainer =
            Trainer::new(compile_model(same_weights(), 0.01), config, device.clone());

        let history = trainer.fit(&train, None, None).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.stopped_epoch, Some(1));
        assert_eq!(history.restored_epoch, Some(0));

        let restored_outputs = fixed_outputs(&trainer);
        assert_eq!(restored_outputs.len(), best_outputs.len());
        for (restored, best) in restored_outputs.iter().zip(&best_outputs) {
            assert!(
                (restored - best).abs() < 1e-4,
                "restored {} differs from best epoch {}",
                restored,
                best
            );
        }
    }
}
