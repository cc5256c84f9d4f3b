//! Epoch-end callbacks
//!
//! Both callbacks watch a minimised quantity (a loss). They only decide; the
//! fit loop applies the decision (stopping, restoring weights, changing the
//! learning rate).

use serde::{Deserialize, Serialize};
use tracing::info;

/// Quantity watched by a callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Monitor {
    ValLoss,
    Loss,
}

impl std::fmt::Display for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Monitor::ValLoss => write!(f, "val_loss"),
            Monitor::Loss => write!(f, "loss"),
        }
    }
}

/// What the fit loop should do after [`EarlyStopping::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopSignal {
    /// New best value; snapshot the weights if restoring
    Improved,
    Continue,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingConfig {
    pub monitor: Monitor,
    pub patience: usize,
    pub min_delta: f64,
    pub restore_best_weights: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            monitor: Monitor::ValLoss,
            patience: 10,
            min_delta: 0.0,
            restore_best_weights: true,
        }
    }
}

/// Stops training once the monitored loss stalls for `patience` epochs
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    pub config: EarlyStoppingConfig,
    best: f64,
    best_epoch: Option<usize>,
    wait: usize,
    stopped_epoch: Option<usize>,
}

impl EarlyStopping {
    pub fn new(config: EarlyStoppingConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            best_epoch: None,
            wait: 0,
            stopped_epoch: None,
        }
    }

    pub fn update(&mut self, epoch: usize, value: f64) -> StopSignal {
        if value < self.best - self.config.min_delta {
            self.best = value;
            self.best_epoch = Some(epoch);
            self.wait = 0;
            return StopSignal::Improved;
        }

        self.wait += 1;
        if self.wait >= self.config.patience {
            self.stopped_epoch = Some(epoch);
            info!(
                "Early stopping at epoch {}: best {} = {:.4} at epoch {}",
                epoch + 1,
                self.config.monitor,
                self.best,
                self.best_epoch.map_or(0, |e| e + 1)
            );
            return StopSignal::Stop;
        }

        StopSignal::Continue
    }

    pub fn best(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best)
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReduceLrConfig {
    pub monitor: Monitor,
    pub factor: f64,
    pub patience: usize,
    pub min_lr: f64,
    /// Minimum decrease that counts as an improvement
    pub min_delta: f64,
}

impl Default for ReduceLrConfig {
    fn default() -> Self {
        Self {
            monitor: Monitor::ValLoss,
            factor: 0.5,
            patience: 5,
            min_lr: 1e-7,
            min_delta: 1e-4,
        }
    }
}

/// Multiplies the learning rate by `factor` when the monitored loss stalls
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    pub config: ReduceLrConfig,
    best: f64,
    wait: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(config: ReduceLrConfig) -> Self {
        Self {
            config,
            best: f64::INFINITY,
            wait: 0,
        }
    }

    /// Returns the new learning rate when it changes
    pub fn update(&mut self, value: f64, current_lr: f64) -> Option<f64> {
        if value < self.best - self.config.min_delta {
            self.best = value;
            self.wait = 0;
            return None;
        }

        self.wait += 1;
        if self.wait < self.config.patience {
            return None;
        }

        self.wait = 0;
        if current_lr <= self.config.min_lr {
            return None;
        }

        let new_lr = (current_lr * self.config.factor).max(self.config.min_lr);
        info!(
            "Reducing learning rate: {:.2e} -> {:.2e} ({} plateaued for {} epochs)",
            current_lr, new_lr, self.config.monitor, self.config.patience
        );
        Some(new_lr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_stopping_waits_for_patience() {
        let mut es = EarlyStopping::new(EarlyStoppingConfig {
            patience: 2,
            ..Default::default()
        });

        assert_eq!(es.update(0, 1.0), StopSignal::Improved);
        assert_eq!(es.update(1, 0.8), StopSignal::Improved);
        assert_eq!(es.update(2, 0.9), StopSignal::Continue);
        assert_eq!(es.update(3, 0.85), StopSignal::Stop);

        assert_eq!(es.best(), Some(0.8));
        assert_eq!(es.best_epoch(), Some(1));
        assert_eq!(es.stopped_epoch(), Some(3));
    }

    #[test]
    fn test_early_stopping_improvement_resets_wait() {
        let mut es = EarlyStopping::new(EarlyStoppingConfig {
            patience: 2,
            ..Default::default()
        });

        es.update(0, 1.0);
        assert_eq!(es.update(1, 1.0), StopSignal::Continue);
        assert_eq!(es.update(2, 0.5), StopSignal::Improved);
        assert_eq!(es.update(3, 0.6), StopSignal::Continue);
        assert_eq!(es.update(4, 0.7), StopSignal::Stop);
    }

    #[test]
    fn test_early_stopping_min_delta() {
        let mut es = EarlyStopping::new(EarlyStoppingConfig {
            patience: 1,
            min_delta: 0.1,
            ..Default::default()
        });

        es.update(0, 1.0);
        // Smaller than min_delta does not count
        assert_eq!(es.update(1, 0.95), StopSignal::Stop);
    }

    #[test]
    fn test_reduce_lr_after_patience_and_resets() {
        let mut plateau = ReduceLrOnPlateau::new(ReduceLrConfig {
            patience: 2,
            ..Default::default()
        });

        assert_eq!(plateau.update(1.0, 0.001), None);
        assert_eq!(plateau.update(1.0, 0.001), None);
        assert_eq!(plateau.update(1.0, 0.001), Some(0.0005));
        // Wait counter restarted
        assert_eq!(plateau.update(1.0, 0.0005), None);
        assert_eq!(plateau.update(1.0, 0.0005), Some(0.00025));
    }

    #[test]
    fn test_reduce_lr_is_floored() {
        let mut plateau = ReduceLrOnPlateau::new(ReduceLrConfig {
            patience: 1,
            ..Default::default()
        });

        plateau.update(1.0, 1.5e-7);
        assert_eq!(plateau.update(1.0, 1.5e-7), Some(1e-7));
        assert_eq!(plateau.update(1.0, 1e-7), None);
    }

    #[test]
    fn test_defaults() {
        let es = EarlyStoppingConfig::default();
        assert_eq!(es.monitor, Monitor::ValLoss);
        assert_eq!(es.patience, 10);
        assert!(es.restore_best_weights);

        let lr = ReduceLrConfig::default();
        assert_eq!(lr.factor, 0.5);
        assert_eq!(lr.patience, 5);
        assert_eq!(lr.min_lr, 1e-7);
        assert_eq!(Monitor::ValLoss.to_string(), "val_loss");
    }
}
