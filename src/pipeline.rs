//! End-to-end batch operations: raw records in, trained state / anomaly
//! records / forecasts out. Each call is synchronous and CPU-bound; async
//! callers run it on a blocking thread.

use chrono::SecondsFormat;
use tracing::{info, instrument};

use crate::config::{ArimaOrder, Config};
use crate::detector::{classifier, features, AnomalyDetector, DetectorConfig, TrainedState};
use crate::error::{AppError, Result};
use crate::forecast::{daily_series, ArimaModel};
use crate::ingest::{self, DataCleaner};
use crate::types::{AnomalyRecord, RawTransaction, Transaction, TransactionDetails};

#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    pub detector: DetectorConfig,
    pub cleaner: DataCleaner,
    pub report_unexplained: bool,
    pub arima_order: ArimaOrder,
}

impl Pipeline {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            detector: DetectorConfig::from_config(cfg),
            cleaner: DataCleaner::with_workers(cfg.cleaning_workers),
            report_unexplained: cfg.report_unexplained,
            arima_order: cfg.arima_order,
        }
    }

    fn prepare(&self, raw: &[RawTransaction]) -> Result<Vec<Transaction>> {
        let parsed = ingest::parse_batch(raw)?;
        Ok(self.cleaner.clean(parsed))
    }

    /// Validate, clean and fit the outlier model on a training batch.
    #[instrument(skip_all, fields(records = raw.len()))]
    pub fn train(&self, raw: &[RawTransaction]) -> Result<TrainedState> {
        let txs = self.prepare(raw)?;
        if txs.is_empty() {
            return Err(AppError::validation(
                "transactions",
                "at least one valid transaction after cleaning",
                format!("0 of {} records remained", raw.len()),
            ));
        }
        let matrix = features::build(&txs);
        let mut detector = AnomalyDetector::new(self.detector);
        detector.fit(&matrix)?;
        detector.into_state()
    }

    /// Score a batch with a fitted detector. Results follow the cleaned
    /// batch order; an empty batch yields an empty result.
    #[instrument(skip_all, fields(records = raw.len()))]
    pub fn detect(&self, raw: &[RawTransaction], detector: &AnomalyDetector) -> Result<Vec<AnomalyRecord>> {
        let state = detector.state()?;
        let txs = self.prepare(raw)?;
        if txs.is_empty() {
            return Ok(Vec::new());
        }

        let matrix = features::build(&txs);
        let flags = detector.predict(&matrix)?;

        let records: Vec<AnomalyRecord> = txs
            .iter()
            .enumerate()
            .map(|(i, tx)| {
                let row = matrix.row(i);
                let reasons = classifier::classify(
                    &row,
                    matrix.ratio_defined[i],
                    flags[i],
                    &state.thresholds,
                    self.report_unexplained,
                );
                AnomalyRecord {
                    transaction_hash: tx.hash.clone().unwrap_or_else(|| "N/A".to_string()),
                    is_anomaly: flags[i],
                    anomaly_types: reasons,
                    transaction_details: TransactionDetails {
                        value: row[features::VALUE],
                        gas: row[features::GAS],
                        gas_price: row[features::GAS_PRICE],
                        timestamp: tx
                            .timestamp
                            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                            .unwrap_or_else(|| "N/A".to_string()),
                    },
                }
            })
            .collect();

        let anomalies = records.iter().filter(|r| r.is_anomaly).count();
        info!(scored = records.len(), anomalies, "Anomaly detection completed");
        Ok(records)
    }

    /// Forecast daily summed value `steps` days past the last observed day.
    #[instrument(skip_all, fields(records = raw.len(), steps = steps))]
    pub fn forecast(&self, raw: &[RawTransaction], steps: usize) -> Result<Vec<f64>> {
        let txs = self.cleaner.clean(ingest::parse_series(raw)?);
        let series: Vec<f64> = daily_series(&txs).into_iter().map(|(_, v)| v).collect();
        if series.is_empty() {
            return Err(AppError::validation(
                "transactions",
                "timestamped transactions with positive value",
                "no daily observations",
            ));
        }

        let mut model = ArimaModel::new(self.arima_order);
        model.fit(&series)?;
        let forecast = model.forecast(steps)?;
        info!(days = series.len(), steps, "Trend forecast completed");
        Ok(forecast)
    }
}
