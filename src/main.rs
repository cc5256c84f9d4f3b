//! Leaf Disease Classification CLI
//!
//! Entry point for training, evaluating and running the leaf disease CNN.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;
use walkdir::WalkDir;

use leaf_disease::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use leaf_disease::config::{ProjectConfig, DEFAULT_CONFIG_PATH};
use leaf_disease::dataset::loader::IMAGE_EXTENSIONS;
use leaf_disease::dataset::{DirectoryGenerator, GeneratorConfig, ImageFolder};
use leaf_disease::inference::Predictor;
use leaf_disease::model::{load_model, LeafCnnConfig, ModelSummary};
use leaf_disease::training::{evaluate, train_model};
use leaf_disease::utils::format_number;
use leaf_disease::utils::logging::{init_logging, LogConfig};

/// Plant leaf disease classification with a Burn CNN
#[derive(Parser, Debug)]
#[command(name = "leaf_disease")]
#[command(version)]
#[command(about = "Train and run a CNN for plant leaf disease classification", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the model described by the configuration file
    Train {
        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Evaluate a saved model on a class-per-directory dataset
    Evaluate {
        /// Path to the saved model (stem, .mpk or .json)
        #[arg(short, long, default_value = "models/cnn_model")]
        model: PathBuf,

        /// Dataset directory; defaults to the configured test directory
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Predict the class of one image or of every image in a directory
    Predict {
        /// Path to the saved model (stem, .mpk or .json)
        #[arg(short, long, default_value = "models/cnn_model")]
        model: PathBuf,

        /// Image file or directory
        #[arg(short, long)]
        input: PathBuf,

        /// Comma-separated class names overriding the ones stored with the model
        #[arg(long, value_delimiter = ',')]
        classes: Option<Vec<String>>,
    },

    /// Print the model architecture
    Summary {
        /// Number of output classes; defaults to the configured class list
        #[arg(short, long)]
        num_classes: Option<usize>,

        /// Path to the configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Show per-class image counts of a dataset directory
    Stats {
        /// Path to the dataset directory
        #[arg(short, long, default_value = "data/train")]
        data_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    info!("Backend: {}", backend_name());

    match cli.command {
        Commands::Train { config } => {
            train_model::<TrainingBackend>(&config, default_device())?;
        }

        Commands::Evaluate {
            model,
            data_dir,
            config,
        } => {
            cmd_evaluate(&model, data_dir.as_deref(), &config)?;
        }

        Commands::Predict {
            model,
            input,
            classes,
        } => {
            cmd_predict(&model, &input, classes)?;
        }

        Commands::Summary {
            num_classes,
            config,
        } => {
            cmd_summary(num_classes, &config)?;
        }

        Commands::Stats { data_dir } => {
            cmd_stats(&data_dir)?;
        }
    }

    Ok(())
}

/// Use the configuration file when it exists, defaults otherwise
fn load_config_or_default(path: &Path) -> Result<ProjectConfig> {
    if path.exists() {
        let config = ProjectConfig::load(path)?;
        config.validate()?;
        Ok(config)
    } else {
        info!("No configuration at {:?}, using defaults", path);
        Ok(ProjectConfig::default())
    }
}

fn cmd_evaluate(model_path: &Path, data_dir: Option<&Path>, config_path: &Path) -> Result<()> {
    let config = load_config_or_default(config_path)?;
    let data_dir = data_dir.unwrap_or(config.data.test_dir.as_path());

    println!("{}", "Evaluating model".green().bold());
    println!("  Model: {:?}", model_path);
    println!("  Data:  {:?}", data_dir);

    let device = default_device();
    let (model, metadata) = load_model::<DefaultBackend, _>(model_path, &device)
        .with_context(|| format!("Failed to load model from {:?}", model_path))?;

    let [height, width] = metadata.image_size;
    let generator = DirectoryGenerator::new(
        data_dir,
        Some(metadata.class_names.as_slice()),
        GeneratorConfig::new((height as u32, width as u32), config.model.batch_size)
            .with_shuffle(false),
    )?;
    if generator.samples() == 0 {
        println!("{} No images found in {:?}", "Error:".red(), data_dir);
        return Ok(());
    }

    let metrics = evaluate(&model, &generator, &device)?;

    println!();
    println!("{}", "Results".cyan().bold());
    println!("  Samples:   {}", format_number(metrics.samples));
    println!("  Loss:      {:.4}", metrics.loss);
    println!("  Accuracy:  {:.2}%", metrics.accuracy * 100.0);
    println!("  Precision: {:.2}%", metrics.precision * 100.0);
    println!("  Recall:    {:.2}%", metrics.recall * 100.0);

    Ok(())
}

fn cmd_predict(model_path: &Path, input: &Path, classes: Option<Vec<String>>) -> Result<()> {
    let mut predictor = Predictor::<DefaultBackend>::load(model_path, default_device())
        .with_context(|| format!("Failed to load model from {:?}", model_path))?;
    if let Some(classes) = classes {
        predictor = predictor.with_class_names(classes);
    }

    let paths = if input.is_dir() {
        image_files(input)
    } else {
        vec![input.to_path_buf()]
    };
    if paths.is_empty() {
        println!("{} No images found in {:?}", "Error:".red(), input);
        return Ok(());
    }

    for (path, result) in predictor.predict_files(&paths) {
        println!("{}", format!("{:?}", path).bold());
        match result {
            Ok(prediction) => {
                println!("{}", prediction);
                println!();
            }
            Err(e) => println!("  {} {}\n", "Failed:".red(), e),
        }
    }

    Ok(())
}

fn cmd_summary(num_classes: Option<usize>, config_path: &Path) -> Result<()> {
    let config = load_config_or_default(config_path)?;
    let num_classes = num_classes.unwrap_or(if config.classes.is_empty() {
        leaf_disease::model::DEFAULT_NUM_CLASSES
    } else {
        config.classes.len()
    });

    let (height, width) = config.image_size();
    let model_config = LeafCnnConfig::new()
        .with_num_classes(num_classes)
        .with_input_size([height as usize, width as usize]);

    println!("{}", ModelSummary::from_config(&model_config));
    Ok(())
}

fn cmd_stats(data_dir: &Path) -> Result<()> {
    info!("Computing dataset statistics for: {:?}", data_dir);

    if !data_dir.is_dir() {
        println!("{} Dataset directory not found: {:?}", "Error:".red(), data_dir);
        println!();
        println!("Expected one subdirectory per class, for example:");
        println!("  {}/healthy/", data_dir.display());
        println!("  {}/rust/", data_dir.display());
        return Ok(());
    }

    let folder = ImageFolder::scan(data_dir, None)?;

    println!("{}", "Dataset Statistics".cyan().bold());
    println!("  Directory: {:?}", data_dir);
    println!("  Classes:   {}", folder.num_classes());
    println!("  Images:    {}", format_number(folder.len()));
    println!();

    let total = folder.len().max(1) as f64;
    for (name, count) in folder.class_names.iter().zip(folder.class_counts()) {
        println!(
            "  {:<30} {:>8} ({:>5.1}%)",
            name,
            format_number(count),
            100.0 * count as f64 / total
        );
    }

    Ok(())
}

fn image_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    files
}
