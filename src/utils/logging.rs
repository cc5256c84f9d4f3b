//! Logging Module
//!
//! Structured logging built on `tracing`. `RUST_LOG` overrides the configured
//! level when set.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use super::format_duration;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to include thread IDs
    pub include_thread_ids: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose logging for debugging
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            include_thread_ids: true,
            ansi_colors: true,
        }
    }

    /// Plain output for services and log collectors
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: true,
            include_thread_ids: false,
            ansi_colors: false,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Initialize the global subscriber
///
/// Returns an error message if a global subscriber was already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .with_thread_ids(config.include_thread_ids)
        .compact()
        .try_init()
        .map_err(|e| format!("Failed to initialize logging: {}", e))
}

/// Epoch-level progress logger used by the fit loop
pub struct TrainingLogger {
    epoch: usize,
    total_epochs: usize,
    epoch_start: Instant,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_epochs: usize) -> Self {
        Self {
            epoch: 0,
            total_epochs,
            epoch_start: Instant::now(),
            training_start: Instant::now(),
        }
    }

    /// Log start of an epoch
    pub fn start_epoch(&mut self, epoch: usize) {
        self.epoch = epoch;
        self.epoch_start = Instant::now();
        tracing::debug!("Epoch {}/{} started", epoch + 1, self.total_epochs);
    }

    /// Seconds spent in the current epoch so far
    pub fn epoch_seconds(&self) -> f64 {
        self.epoch_start.elapsed().as_secs_f64()
    }

    /// Log end of an epoch with metrics
    pub fn end_epoch(&self, train_loss: f64, val_loss: Option<f64>, learning_rate: f64) {
        let total_time = self.training_start.elapsed().as_secs_f64();
        let epochs_remaining = self.total_epochs.saturating_sub(self.epoch + 1);
        let eta_secs = epochs_remaining as f64 * total_time / (self.epoch + 1) as f64;

        tracing::info!(
            "Epoch {}/{} completed in {} | loss: {:.4} | val_loss: {} | lr: {:.2e} | ETA: {}",
            self.epoch + 1,
            self.total_epochs,
            format_duration(self.epoch_seconds()),
            train_loss,
            val_loss.map_or_else(|| "n/a".to_string(), |v| format!("{:.4}", v)),
            learning_rate,
            format_duration(eta_secs)
        );
    }

    /// Log early stopping
    pub fn log_early_stop(&self, patience: usize) {
        tracing::warn!(
            "Early stopping after epoch {}: no improvement for {} epochs",
            self.epoch + 1,
            patience
        );
    }

    /// Log training completion
    pub fn log_complete(&self, epochs_run: usize) {
        tracing::info!(
            "Training complete: {} epochs in {}",
            epochs_run,
            format_duration(self.training_start.elapsed().as_secs_f64())
        );
    }
}
