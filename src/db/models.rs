//! Row types for the tables in `migrations/0001_init.sql`.
use serde::Serialize;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DetectionRow {
    pub id: i64,
    pub detected_at: i64,
    pub transaction_hash: String,
    pub is_anomaly: i64,
    pub severity: String,
    /// JSON array of `{type, severity, details}`.
    pub anomaly_types: String,
    pub value: f64,
    pub gas: f64,
    pub gas_price: f64,
    pub tx_timestamp: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TrainingRunRow {
    pub id: i64,
    pub trained_at: i64,
    pub source: String,
    pub records_in: i64,
    pub contamination: f64,
    pub n_estimators: i64,
    pub random_seed: i64,
    pub decision_threshold: f64,
    pub value_threshold: f64,
    pub gas_threshold: f64,
    pub gas_price_threshold: f64,
    pub ratio_threshold: Option<f64>,
    pub duration_ms: f64,
}

/// Where a training batch came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingSource {
    Request,
    File,
    Etherscan,
}

impl std::fmt::Display for TrainingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TrainingSource::Request => "request",
            TrainingSource::File => "file",
            TrainingSource::Etherscan => "etherscan",
        };
        write!(f, "{s}")
    }
}
