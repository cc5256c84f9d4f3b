//! Optimizer, loss and metric wiring for training
//!
//! A [`CompiledModel`] owns the model together with its Adam optimizer and
//! performs single optimisation steps. Epoch orchestration lives in the
//! training module.

use std::fmt;

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    tensor::{backend::AutodiffBackend, ElementConversion},
};

use super::cnn::LeafCnn;
use crate::dataset::LeafBatch;

/// Default Adam learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;

/// Loss optimised during training
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Softmax followed by cross-entropy against the integer class
    CategoricalCrossentropy,
}

/// Metrics reported alongside the loss
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Accuracy,
    Precision,
    Recall,
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricKind::Accuracy => write!(f, "accuracy"),
            MetricKind::Precision => write!(f, "precision"),
            MetricKind::Recall => write!(f, "recall"),
        }
    }
}

/// Result of one optimisation step
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepOutput {
    pub loss: f64,
    pub correct: usize,
    pub samples: usize,
}

/// Model paired with its optimizer, loss and metrics
pub struct CompiledModel<B: AutodiffBackend, O> {
    pub model: LeafCnn<B>,
    pub optimizer: O,
    pub learning_rate: f64,
    pub loss: LossKind,
    pub metrics: Vec<MetricKind>,
}

impl<B, O> CompiledModel<B, O>
where
    B: AutodiffBackend,
    O: Optimizer<LeafCnn<B>, B>,
{
    /// Forward, loss, backward and an optimizer step on one batch
    pub fn train_step(&mut self, batch: LeafBatch<B>) -> StepOutput {
        let samples = batch.targets.dims()[0];
        let output = self.model.forward(batch.images);

        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), batch.targets.clone());
        let loss_value: f64 = loss.clone().into_scalar().elem();

        let predictions = output.argmax(1).reshape([samples]);
        let correct: i64 = predictions
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        self.model = self
            .optimizer
            .step(self.learning_rate, self.model.clone(), grads);

        StepOutput {
            loss: loss_value,
            correct: correct as usize,
            samples,
        }
    }

    /// Inference copy of the current weights
    pub fn valid_model(&self) -> LeafCnn<B::InnerBackend> {
        self.model.valid()
    }

    pub fn set_learning_rate(&mut self, learning_rate: f64) {
        self.learning_rate = learning_rate;
    }
}

/// Pair `model` with Adam at `learning_rate`, categorical cross-entropy and
/// the accuracy/precision/recall metrics
pub fn compile_model<B: AutodiffBackend>(
    model: LeafCnn<B>,
    learning_rate: f64,
) -> CompiledModel<B, impl Optimizer<LeafCnn<B>, B>> {
    let optimizer = AdamConfig::new()
        .with_epsilon(1e-7)
        .init::<B, LeafCnn<B>>();

    CompiledModel {
        model,
        optimizer,
        learning_rate,
        loss: LossKind::CategoricalCrossentropy,
        metrics: vec![MetricKind::Accuracy, MetricKind::Precision, MetricKind::Recall],
    }
}
