//! End-to-end training run
//!
//! Loads the configuration, builds the generators and model, fits with
//! callbacks, evaluates, saves the model and records everything in a local
//! tracking run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{module::AutodiffModule, optim::Optimizer, tensor::backend::AutodiffBackend};
use colored::Colorize;

use crate::config::ProjectConfig;
use crate::dataset::{create_data_generators, DirectoryGenerator};
use crate::model::{
    compile_model, save_model, LeafCnn, LeafCnnConfig, ModelMetadata, ModelSummary,
};
use crate::training::tracking::{ExperimentTracker, RunStatus};
use crate::training::trainer::{evaluate, FitConfig, History, Trainer};
use crate::utils::error::LeafError;
use crate::utils::metrics::EvaluationMetrics;

/// What a completed run produced
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub history: History,
    pub validation: Option<EvaluationMetrics>,
    pub test: Option<EvaluationMetrics>,
    /// Saved model path without extension
    pub model_path: PathBuf,
    pub run_id: String,
}

/// Train from the configuration file at `config_path`
///
/// Returns `Ok(None)` when the training directory is missing; the expected
/// layout is printed instead.
pub fn train_model<B: AutodiffBackend>(
    config_path: &Path,
    device: B::Device,
) -> Result<Option<TrainingOutcome>> {
    println!("{}", "=".repeat(50));
    println!("{}", "STARTING TRAINING".green().bold());
    println!("{}", "=".repeat(50));

    println!("\n{}", "1. Loading configuration...".cyan());
    let config = ProjectConfig::load(config_path)?;
    config.validate()?;
    println!("   Configuration loaded from {:?}", config_path);

    run_training::<B>(&config, device)
}

/// Train with an already loaded configuration
pub fn run_training<B: AutodiffBackend>(
    config: &ProjectConfig,
    device: B::Device,
) -> Result<Option<TrainingOutcome>> {
    println!("\n{}", "2. Loading data...".cyan());
    let (train, valid, test) = match create_data_generators(config) {
        Ok(generators) => generators,
        Err(LeafError::DatasetNotFound(dir)) => {
            println!("   {} dataset directory {:?} does not exist", "ERROR:".red(), dir);
            print_layout_instructions();
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };

    let num_classes = train.num_classes();
    println!("   Number of classes: {}", num_classes);
    println!("   Classes: {:?}", train.class_names());
    println!("   Training images: {}", train.samples());
    if let Some(valid) = &valid {
        println!("   Validation images: {}", valid.samples());
    }
    if let Some(test) = &test {
        println!("   Test images: {}", test.samples());
    }

    println!("\n{}", "3. Creating the CNN model...".cyan());
    let (height, width) = config.image_size();
    let model_config = LeafCnnConfig::new()
        .with_input_size([height as usize, width as usize])
        .with_num_classes(num_classes);
    let model: LeafCnn<B> = model_config.init(&device);
    let compiled = compile_model(model, config.model.learning_rate);
    println!("   Model created");

    println!("\n{}", "4. Model architecture:".cyan());
    println!("{}", ModelSummary::from_config(&model_config));

    println!("\n{}", "5. Starting experiment tracking...".cyan());
    let mut tracker =
        ExperimentTracker::new(&config.tracking.tracking_dir, &config.tracking.experiment_name);
    let run_id = tracker.start_run()?.run_id.clone();
    println!("   Run {} in {:?}", run_id, tracker.run_dir()?);

    let outcome = tracked_run(
        config,
        &mut tracker,
        Trainer::new(compiled, FitConfig::new(config.model.epochs), device),
        &train,
        valid.as_ref(),
        test.as_ref(),
        model_config,
    );

    match outcome {
        Ok((history, validation, test_metrics, model_path)) => {
            tracker.end_run(RunStatus::Finished)?;
            println!("\n{}", "=".repeat(50));
            println!("{}", "TRAINING COMPLETED SUCCESSFULLY".green().bold());
            println!("{}", "=".repeat(50));
            Ok(Some(TrainingOutcome {
                history,
                validation,
                test: test_metrics,
                model_path,
                run_id,
            }))
        }
        Err(e) => {
            tracker.end_run(RunStatus::Failed)?;
            Err(e)
        }
    }
}

type RunResult = (History, Option<EvaluationMetrics>, Option<EvaluationMetrics>, PathBuf);

fn tracked_run<B, O>(
    config: &ProjectConfig,
    tracker: &mut ExperimentTracker,
    mut trainer: Trainer<B, O>,
    train: &DirectoryGenerator,
    valid: Option<&DirectoryGenerator>,
    test: Option<&DirectoryGenerator>,
    model_config: LeafCnnConfig,
) -> Result<RunResult>
where
    B: AutodiffBackend,
    O: Optimizer<LeafCnn<B>, B>,
{
    tracker.log_params([
        ("image_size", format!("{:?}", config.model.image_size)),
        ("batch_size", config.model.batch_size.to_string()),
        ("epochs", config.model.epochs.to_string()),
        ("learning_rate", config.model.learning_rate.to_string()),
        ("num_classes", train.num_classes().to_string()),
    ])?;

    println!("\n{}", "6. Training...".cyan());
    println!("{}", "-".repeat(50));
    let history = trainer.fit(train, valid, Some(&mut *tracker))?;
    println!("{}", "-".repeat(50));
    if let Some(epoch) = history.stopped_epoch {
        println!("   Stopped early after epoch {}", epoch + 1);
    }
    if let Some(epoch) = history.restored_epoch {
        println!("   Restored weights from epoch {}", epoch + 1);
    }
    println!("   Training finished");

    let device = trainer.device().clone();
    let valid_model = trainer.into_model().valid();

    let validation = match valid {
        Some(generator) => {
            println!("\n{}", "7. Evaluating on validation data...".cyan());
            let metrics = evaluate(&valid_model, generator, &device)?;
            tracker.log_metrics(&prefixed("val", &metrics), None)?;
            print_metrics("Validation", &metrics);
            Some(metrics)
        }
        None => None,
    };

    let test_metrics = match test {
        Some(generator) => {
            println!("\n{}", "   Evaluating on test data...".cyan());
            let metrics = evaluate(&valid_model, generator, &device)?;
            tracker.log_metrics(&prefixed("test", &metrics), None)?;
            print_metrics("Test", &metrics);
            Some(metrics)
        }
        None => None,
    };

    println!("\n{}", "8. Saving the model...".cyan());
    let metadata = ModelMetadata::new(&model_config, train.class_names().to_vec());
    let model_path = save_model(
        &valid_model,
        &metadata,
        &config.output.model_dir,
        &config.output.model_name,
    )
    .context("Failed to save model")?;
    println!("   Model saved to {:?}", model_path);

    for extension in ["mpk", "json"] {
        tracker.log_artifact(model_path.with_extension(extension), Some("model"))?;
    }

    Ok((history, validation, test_metrics, model_path))
}

fn prefixed(prefix: &str, metrics: &EvaluationMetrics) -> BTreeMap<String, f64> {
    [
        ("loss", metrics.loss),
        ("accuracy", metrics.accuracy),
        ("precision", metrics.precision),
        ("recall", metrics.recall),
    ]
    .into_iter()
    .map(|(k, v)| (format!("{prefix}_{k}"), v))
    .collect()
}

fn print_metrics(label: &str, metrics: &EvaluationMetrics) {
    println!("   {label} Loss: {:.4}", metrics.loss);
    println!("   {label} Accuracy: {:.4}", metrics.accuracy);
    println!("   {label} Precision: {:.4}", metrics.precision);
    println!("   {label} Recall: {:.4}", metrics.recall);
}

fn print_layout_instructions() {
    println!("\n   {}", "INSTRUCTIONS:".yellow().bold());
    println!("   1. Put your images in data/train/, data/valid/, data/test/");
    println!("   2. Each subdirectory is one class");
    println!("   Example:");
    println!("      data/train/healthy/");
    println!("      data/train/diseased/");
}
