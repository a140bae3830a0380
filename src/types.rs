use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Transaction as delivered by Etherscan or a JSON input file.
/// Fields arrive as strings or numbers and may be missing entirely.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(rename = "timeStamp", default, skip_serializing_if = "Option::is_none")]
    pub time_stamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas: Option<Value>,
    #[serde(rename = "gasPrice", default, skip_serializing_if = "Option::is_none")]
    pub gas_price: Option<Value>,
}

/// Body of `{"transactions": [...]}` payloads (input files and API requests).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionList {
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
}

/// Accepted batch shapes: `{"transactions": [...]}` or a bare array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TransactionInput {
    Wrapped(TransactionList),
    Bare(Vec<RawTransaction>),
}

impl TransactionInput {
    pub fn into_transactions(self) -> Vec<RawTransaction> {
        match self {
            TransactionInput::Wrapped(list) => list.transactions,
            TransactionInput::Bare(txs) => txs,
        }
    }
}

/// Typed transaction, produced once at the ingestion boundary.
/// `None` marks a value that was missing or not a usable number.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub hash: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub value: Option<f64>,
    pub gas: Option<f64>,
    pub gas_price: Option<f64>,
}

// ---------------------------------------------------------------------------
// Anomaly classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Normal,
    HighValueTransaction,
    HighGasConsumption,
    HighGasPrice,
    UnusualValueGasRatio,
    /// Outlier flagged by the model that no threshold rule explains.
    UnexplainedAnomaly,
}

impl std::fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AnomalyKind::Normal => "normal",
            AnomalyKind::HighValueTransaction => "high_value_transaction",
            AnomalyKind::HighGasConsumption => "high_gas_consumption",
            AnomalyKind::HighGasPrice => "high_gas_price",
            AnomalyKind::UnusualValueGasRatio => "unusual_value_gas_ratio",
            AnomalyKind::UnexplainedAnomaly => "unexplained_anomaly",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        write!(f, "{s}")
    }
}

/// One explanation attached to a scored transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReason {
    #[serde(rename = "type")]
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub details: String,
}

impl AnomalyReason {
    pub fn normal() -> Self {
        Self {
            kind: AnomalyKind::Normal,
            severity: Severity::None,
            details: "No anomalies detected".to_string(),
        }
    }
}

/// Snapshot of the raw fields a record was scored on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub value: f64,
    pub gas: f64,
    #[serde(rename = "gasPrice")]
    pub gas_price: f64,
    /// RFC 3339 timestamp, or `"N/A"` when the record carried none.
    pub timestamp: String,
}

/// Scoring outcome for one transaction. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub transaction_hash: String,
    pub is_anomaly: bool,
    pub anomaly_types: Vec<AnomalyReason>,
    pub transaction_details: TransactionDetails,
}

impl AnomalyRecord {
    /// Highest severity among the attached reasons.
    pub fn max_severity(&self) -> Severity {
        self.anomaly_types
            .iter()
            .map(|r| r.severity)
            .max()
            .unwrap_or(Severity::None)
    }
}

// ---------------------------------------------------------------------------
// Channel message types
// ---------------------------------------------------------------------------

/// Routed from the detect endpoint to the DB writer.
#[derive(Debug, Clone)]
pub struct DetectionBatch {
    pub records: Vec<AnomalyRecord>,
    /// Nanosecond UTC epoch of when the batch was scored.
    pub detected_at_ns: i64,
}
