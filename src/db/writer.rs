use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::db::models::TrainingSource;
use crate::detector::TrainedState;
use crate::error::Result;
use crate::types::{AnomalyRecord, DetectionBatch};

/// Receives scored batches from the API and persists them to SQLite.
/// Runs as a dedicated background task so detection never waits on disk.
pub struct DbWriter {
    pool: sqlx::SqlitePool,
    detections_rx: mpsc::Receiver<DetectionBatch>,
}

impl DbWriter {
    pub fn new(pool: sqlx::SqlitePool, detections_rx: mpsc::Receiver<DetectionBatch>) -> Self {
        Self { pool, detections_rx }
    }

    pub async fn run(mut self) {
        while let Some(batch) = self.detections_rx.recv().await {
            match write_batch(&self.pool, &batch).await {
                Ok(()) => debug!(records = batch.records.len(), "Detection batch persisted"),
                Err(e) => error!("DB write error: {e}"),
            }
        }
    }
}

/// Insert every record of a batch inside one transaction.
pub async fn write_batch(pool: &sqlx::SqlitePool, batch: &DetectionBatch) -> Result<()> {
    let mut tx = pool.begin().await?;
    for record in &batch.records {
        insert_detection(&mut tx, batch.detected_at_ns, record).await?;
    }
    tx.commit().await?;
    Ok(())
}

async fn insert_detection(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    detected_at: i64,
    r: &AnomalyRecord,
) -> Result<()> {
    let anomaly_types = serde_json::to_string(&r.anomaly_types)?;
    let severity = r.max_severity().to_string();
    let d = &r.transaction_details;

    sqlx::query(
        r#"
        INSERT INTO detections (
            detected_at, transaction_hash, is_anomaly, severity, anomaly_types,
            value, gas, gas_price, tx_timestamp
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(detected_at)
    .bind(&r.transaction_hash)
    .bind(i64::from(r.is_anomaly))
    .bind(severity)
    .bind(anomaly_types)
    .bind(d.value)
    .bind(d.gas)
    .bind(d.gas_price)
    .bind(&d.timestamp)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Record a completed fit. Returns the new row id.
pub async fn insert_training_run(
    pool: &sqlx::SqlitePool,
    trained_at_ns: i64,
    source: TrainingSource,
    records_in: usize,
    state: &TrainedState,
    duration_ms: f64,
) -> Result<i64> {
    let t = &state.thresholds;
    let result = sqlx::query(
        r#"
        INSERT INTO training_runs (
            trained_at, source, records_in, contamination, n_estimators, random_seed,
            decision_threshold, value_threshold, gas_threshold, gas_price_threshold,
            ratio_threshold, duration_ms
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(trained_at_ns)
    .bind(source.to_string())
    .bind(records_in as i64)
    .bind(state.config.contamination)
    .bind(state.config.n_estimators as i64)
    .bind(state.config.random_seed as i64)
    .bind(state.decision_threshold)
    .bind(t.value)
    .bind(t.gas)
    .bind(t.gas_price)
    .bind(t.value_per_gas)
    .bind(duration_ms)
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{DetectionRow, TrainingRunRow};
    use crate::types::{AnomalyKind, AnomalyReason, Severity, TransactionDetails};

    fn record(hash: &str, is_anomaly: bool) -> AnomalyRecord {
        let reason = if is_anomaly {
            AnomalyReason {
                kind: AnomalyKind::HighValueTransaction,
                severity: Severity::High,
                details: "Transaction value (900) exceeds threshold (600)".to_string(),
            }
        } else {
            AnomalyReason::normal()
        };
        AnomalyRecord {
            transaction_hash: hash.to_string(),
            is_anomaly,
            anomaly_types: vec![reason],
            transaction_details: TransactionDetails {
                value: 900.0,
                gas: 21000.0,
                gas_price: 50.0,
                timestamp: "N/A".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn writer_persists_batches() {
        let pool = crate::db::memory_pool().await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let handle = tokio::spawn(DbWriter::new(pool.clone(), rx).run());

        tx.send(DetectionBatch {
            records: vec![record("0x1", true), record("0x2", false)],
            detected_at_ns: 42,
        })
        .await
        .unwrap();
        drop(tx);
        handle.await.unwrap();

        let rows: Vec<DetectionRow> =
            sqlx::query_as("SELECT * FROM detections ORDER BY id")
                .fetch_all(&pool)
                .await
                .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].severity, "high");
        assert_eq!(rows[0].is_anomaly, 1);
        assert_eq!(rows[1].severity, "none");
        assert!(rows[0].anomaly_types.contains("high_value_transaction"));
    }

    #[tokio::test]
    async fn training_run_is_recorded() {
        let pool = crate::db::memory_pool().await.unwrap();
        let pipeline = crate::pipeline::Pipeline::default();
        let raw: Vec<crate::types::RawTransaction> = serde_json::from_value(serde_json::json!([
            {"hash": "0x1", "value": "1", "gas": "21000", "gasPrice": "50"},
            {"hash": "0x2", "value": "2", "gas": "21000", "gasPrice": "50"},
            {"hash": "0x3", "value": "90", "gas": "0", "gasPrice": "50"}
        ]))
        .unwrap();
        let state = pipeline.train(&raw).unwrap();

        let id = insert_training_run(&pool, 7, TrainingSource::File, raw.len(), &state, 1.5)
            .await
            .unwrap();
        let row: TrainingRunRow = sqlx::query_as("SELECT * FROM training_runs WHERE id = ?")
            .bind(id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.source, "file");
        assert_eq!(row.records_in, 3);
        assert_eq!(row.n_estimators, 100);
        assert!(row.ratio_threshold.is_some());
    }
}
