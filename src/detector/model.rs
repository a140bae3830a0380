use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{Config, MAX_SAMPLES, THRESHOLD_PERCENTILE};
use crate::detector::features::FeatureMatrix;
use crate::detector::forest::{ForestParams, IsolationForest};
use crate::detector::scaler::StandardScaler;
use crate::detector::thresholds::{percentile, ThresholdTable};
use crate::error::{AppError, Result};

/// Hyper-parameters of the outlier model. Persisted next to the forest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: usize,
    pub random_seed: u64,
    pub threshold_percentile: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            contamination: 0.01,
            n_estimators: 100,
            max_samples: MAX_SAMPLES,
            random_seed: 42,
            threshold_percentile: THRESHOLD_PERCENTILE,
        }
    }
}

impl DetectorConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            contamination: cfg.contamination,
            n_estimators: cfg.n_estimators,
            random_seed: cfg.random_seed,
            ..Self::default()
        }
    }

    fn forest_params(&self) -> ForestParams {
        ForestParams {
            n_estimators: self.n_estimators,
            max_samples: self.max_samples,
            seed: self.random_seed,
        }
    }
}

/// Everything produced by a fit. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainedState {
    pub config: DetectorConfig,
    pub scaler: StandardScaler,
    pub forest: IsolationForest,
    /// Scores strictly above this are outliers.
    pub decision_threshold: f64,
    pub thresholds: ThresholdTable,
}

impl TrainedState {
    pub fn fit(features: &FeatureMatrix, config: DetectorConfig) -> Result<Self> {
        if features.is_empty() {
            return Err(AppError::validation(
                "batch",
                "at least one transaction after cleaning",
                "0 rows",
            ));
        }

        let scaler = StandardScaler::fit(&features.data)?;
        let scaled = scaler.transform(&features.data)?;
        let forest = IsolationForest::fit(&scaled, &config.forest_params())?;
        let train_scores = forest.score_samples(&scaled)?;
        let decision_threshold =
            percentile(&train_scores, 100.0 * (1.0 - config.contamination)).unwrap_or(f64::INFINITY);
        let thresholds = ThresholdTable::compute(features, config.threshold_percentile)?;

        let outliers = train_scores.iter().filter(|s| **s > decision_threshold).count();
        info!(
            rows = features.nrows(),
            trees = forest.n_trees(),
            decision_threshold,
            outliers,
            value_threshold = thresholds.value,
            gas_threshold = thresholds.gas,
            gas_price_threshold = thresholds.gas_price,
            "Outlier model trained"
        );

        Ok(Self {
            config,
            scaler,
            forest,
            decision_threshold,
            thresholds,
        })
    }

    pub fn score_samples(&self, features: &FeatureMatrix) -> Result<Vec<f64>> {
        let scaled = self.scaler.transform(&features.data)?;
        self.forest.score_samples(&scaled)
    }

    /// Outlier flag per row, in input order.
    pub fn predict(&self, features: &FeatureMatrix) -> Result<Vec<bool>> {
        Ok(self
            .score_samples(features)?
            .into_iter()
            .map(|s| s > self.decision_threshold)
            .collect())
    }
}

/// Holder that is either unfitted or carries a [`TrainedState`].
#[derive(Debug, Clone, Default)]
pub struct AnomalyDetector {
    config: DetectorConfig,
    state: Option<TrainedState>,
}

impl AnomalyDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config, state: None }
    }

    pub fn from_state(state: TrainedState) -> Self {
        Self {
            config: state.config,
            state: Some(state),
        }
    }

    pub fn fit(&mut self, features: &FeatureMatrix) -> Result<&TrainedState> {
        let state = TrainedState::fit(features, self.config)?;
        Ok(self.state.insert(state))
    }

    pub fn state(&self) -> Result<&TrainedState> {
        self.state.as_ref().ok_or(AppError::NotFitted("anomaly detector"))
    }

    pub fn predict(&self, features: &FeatureMatrix) -> Result<Vec<bool>> {
        self.state()?.predict(features)
    }

    pub fn into_state(self) -> Result<TrainedState> {
        self.state.ok_or(AppError::NotFitted("anomaly detector"))
    }
}
