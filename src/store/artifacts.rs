use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::artifacts::{FOREST_FILE, SCALER_FILE, THRESHOLDS_FILE};
use crate::detector::features::N_FEATURES;
use crate::detector::forest::IsolationForest;
use crate::detector::scaler::StandardScaler;
use crate::detector::{DetectorConfig, ThresholdTable, TrainedState};
use crate::error::{AppError, Result};

/// On-disk form of the forest file: the trees plus what is needed to turn
/// scores back into flags.
#[derive(Debug, Serialize, Deserialize)]
struct ForestArtifact {
    config: DetectorConfig,
    decision_threshold: f64,
    forest: IsolationForest,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArtifactStatus {
    pub path: String,
    pub size_bytes: u64,
    pub last_modified: DateTime<Utc>,
}

/// Directory holding the three model artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn forest_path(&self) -> PathBuf {
        self.dir.join(FOREST_FILE)
    }

    pub fn exists(&self) -> bool {
        self.forest_path().is_file()
    }

    pub fn save(&self, state: &TrainedState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;

        let forest = ForestArtifact {
            config: state.config,
            decision_threshold: state.decision_threshold,
            forest: state.forest.clone(),
        };
        write_json(&self.forest_path(), &forest)?;
        write_json(&self.dir.join(SCALER_FILE), &state.scaler)?;
        write_json(&self.dir.join(THRESHOLDS_FILE), &state.thresholds)?;

        info!(dir = %self.dir.display(), "Model artifacts saved");
        Ok(())
    }

    pub fn load(&self) -> Result<TrainedState> {
        let forest: ForestArtifact = read_json(&self.forest_path())?;
        let scaler: StandardScaler = read_json(&self.dir.join(SCALER_FILE))?;
        let thresholds: ThresholdTable = read_json(&self.dir.join(THRESHOLDS_FILE))?;

        if scaler.mean.len() != N_FEATURES || scaler.scale.len() != N_FEATURES {
            return Err(AppError::ArtifactUnreadable {
                path: self.dir.join(SCALER_FILE),
                reason: format!(
                    "expected {N_FEATURES} features, found {}",
                    scaler.mean.len()
                ),
            });
        }

        info!(dir = %self.dir.display(), trees = forest.forest.n_trees(), "Model artifacts loaded");
        Ok(TrainedState {
            config: forest.config,
            scaler,
            forest: forest.forest,
            decision_threshold: forest.decision_threshold,
            thresholds,
        })
    }

    /// Size and modification time of the forest file.
    pub fn status(&self) -> Result<ArtifactStatus> {
        let path = self.forest_path();
        let meta = fs::metadata(&path).map_err(|e| not_found_or(&path, e))?;
        let modified = meta.modified()?;
        Ok(ArtifactStatus {
            path: path.display().to_string(),
            size_bytes: meta.len(),
            last_modified: DateTime::<Utc>::from(modified),
        })
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = fs::read(path).map_err(|e| not_found_or(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| AppError::ArtifactUnreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn not_found_or(path: &Path, e: std::io::Error) -> AppError {
    if e.kind() == std::io::ErrorKind::NotFound {
        AppError::ArtifactNotFound {
            path: path.to_path_buf(),
        }
    } else {
        AppError::ArtifactUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    }
}
