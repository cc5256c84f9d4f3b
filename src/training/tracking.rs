//! Local experiment tracking
//!
//! Runs are stored as plain files:
//!
//! ```text
//! <tracking_dir>/<experiment>/<run_id>/
//! ├── meta.json       run id, status, start and end time
//! ├── params.json     hyperparameters (string values)
//! ├── metrics.jsonl   every logged metric, one JSON object per line
//! ├── metrics.json    latest value per metric
//! └── artifacts/      copied files
//! ```

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::utils::error::{LeafError, Result};

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Finished,
    Failed,
}

/// Contents of `meta.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: String,
    pub experiment_name: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// One line of `metrics.jsonl`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRecord {
    pub key: String,
    pub value: f64,
    pub step: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

pub struct ExperimentTracker {
    experiment_dir: PathBuf,
    experiment_name: String,
    run: Option<RunInfo>,
}

impl ExperimentTracker {
    pub fn new<P: AsRef<Path>>(tracking_dir: P, experiment_name: &str) -> Self {
        Self {
            experiment_dir: tracking_dir.as_ref().join(experiment_name),
            experiment_name: experiment_name.to_string(),
            run: None,
        }
    }

    pub fn experiment_name(&self) -> &str {
        &self.experiment_name
    }

    pub fn active_run(&self) -> Option<&RunInfo> {
        self.run.as_ref()
    }

    /// Directory of the active run
    pub fn run_dir(&self) -> Result<PathBuf> {
        let run = self.run.as_ref().ok_or_else(no_active_run)?;
        Ok(self.experiment_dir.join(&run.run_id))
    }

    /// Start a new run; fails if one is already active
    pub fn start_run(&mut self) -> Result<&RunInfo> {
        if let Some(run) = &self.run {
            return Err(LeafError::Tracking(format!(
                "Run {} is still active",
                run.run_id
            )));
        }

        let run = RunInfo {
            run_id: uuid::Uuid::new_v4().simple().to_string(),
            experiment_name: self.experiment_name.clone(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
        };

        let dir = self.experiment_dir.join(&run.run_id);
        fs::create_dir_all(dir.join("artifacts"))?;
        write_json(&dir.join("meta.json"), &run)?;

        info!(
            "Started run {} in experiment '{}'",
            run.run_id, self.experiment_name
        );
        Ok(self.run.insert(run))
    }

    /// Merge parameters into `params.json`
    pub fn log_params<I, K, V>(&self, params: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: ToString,
    {
        let path = self.run_dir()?.join("params.json");
        let mut stored: BTreeMap<String, String> = read_json_or_default(&path)?;
        for (key, value) in params {
            stored.insert(key.into(), value.to_string());
        }
        write_json(&path, &stored)
    }

    /// Append metrics to `metrics.jsonl` and refresh `metrics.json`
    pub fn log_metrics(&self, metrics: &BTreeMap<String, f64>, step: Option<usize>) -> Result<()> {
        let dir = self.run_dir()?;
        let timestamp = Utc::now();

        let mut history = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("metrics.jsonl"))?;
        for (key, &value) in metrics {
            let record = MetricRecord {
                key: key.clone(),
                value,
                step,
                timestamp,
            };
            writeln!(history, "{}", serde_json::to_string(&record)?)?;
        }

        let latest_path = dir.join("metrics.json");
        let mut latest: BTreeMap<String, f64> = read_json_or_default(&latest_path)?;
        latest.extend(metrics.iter().map(|(k, v)| (k.clone(), *v)));
        write_json(&latest_path, &latest)?;

        debug!("Logged {} metrics at step {:?}", metrics.len(), step);
        Ok(())
    }

    /// Copy a file or directory into `artifacts/[artifact_path/]`
    pub fn log_artifact<P: AsRef<Path>>(&self, path: P, artifact_path: Option<&str>) -> Result<PathBuf> {
        let source = path.as_ref();
        let mut target_dir = self.run_dir()?.join("artifacts");
        if let Some(sub) = artifact_path {
            target_dir = target_dir.join(sub);
        }
        fs::create_dir_all(&target_dir)?;

        let name = source.file_name().ok_or_else(|| {
            LeafError::Tracking(format!("Artifact path {:?} has no file name", source))
        })?;
        let target = target_dir.join(name);

        if source.is_dir() {
            for entry in WalkDir::new(source).into_iter().filter_map(|e| e.ok()) {
                let relative = entry.path().strip_prefix(source).map_err(|e| {
                    LeafError::Tracking(format!("Failed to copy artifact {:?}: {}", source, e))
                })?;
                let dest = target.join(relative);
                if entry.file_type().is_dir() {
                    fs::create_dir_all(&dest)?;
                } else {
                    fs::copy(entry.path(), &dest)?;
                }
            }
        } else {
            fs::copy(source, &target)?;
        }

        debug!("Logged artifact {:?}", target);
        Ok(target)
    }

    /// Record the final status and close the run
    pub fn end_run(&mut self, status: RunStatus) -> Result<RunInfo> {
        let dir = self.run_dir()?;
        let mut run = self.run.take().ok_or_else(no_active_run)?;
        run.status = status;
        run.end_time = Some(Utc::now());
        write_json(&dir.join("meta.json"), &run)?;

        info!("Run {} ended with status {:?}", run.run_id, status);
        Ok(run)
    }
}

fn no_active_run() -> LeafError {
    LeafError::Tracking("No active run; call start_run first".into())
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    Ok(())
}

fn read_json_or_default<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de> + Default,
{
    if !path.exists() {
        return Ok(T::default());
    }
    Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
}
