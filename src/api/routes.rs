use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

use crate::api::latency::{LatencySnapshot, LatencyStats, Operation};
use crate::config::{Config, DEFAULT_FORECAST_STEPS};
use crate::db::models::{DetectionRow, TrainingRunRow, TrainingSource};
use crate::db::writer::insert_training_run;
use crate::detector::{AnomalyDetector, ThresholdTable};
use crate::error::AppError;
use crate::fetcher::fetch_training_batch;
use crate::pipeline::Pipeline;
use crate::store::ArtifactStore;
use crate::types::{AnomalyRecord, DetectionBatch, RawTransaction, TransactionInput};

/// Upper bound on `steps` accepted by `/forecast`.
const MAX_FORECAST_STEPS: usize = 365;

#[derive(Clone)]
pub struct ApiState {
    pub pool: sqlx::SqlitePool,
    pub cfg: Arc<Config>,
    pub pipeline: Arc<Pipeline>,
    pub artifacts: ArtifactStore,
    pub latency: Arc<LatencyStats>,
    pub detections_tx: mpsc::Sender<DetectionBatch>,
    /// Serializes fit and score against the artifact directory.
    pub model_lock: Arc<Mutex<()>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/train", post(train))
        .route("/detect", post(detect))
        .route("/model/status", get(model_status))
        .route("/forecast", post(forecast))
        .route("/detections/recent", get(get_recent_detections))
        .route("/stats/summary", get(get_stats_summary))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / query types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct ForecastRequest {
    #[serde(default)]
    pub transactions: Vec<RawTransaction>,
    pub steps: Option<usize>,
}

#[derive(Deserialize)]
pub struct RecentDetectionsQuery {
    pub limit: Option<i64>,
    pub anomalies_only: Option<bool>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct TrainResponse {
    pub status: &'static str,
    pub source: String,
    pub records_in: usize,
    pub decision_threshold: f64,
    pub thresholds: ThresholdTable,
    pub training_run_id: i64,
    pub duration_ms: f64,
}

#[derive(Serialize)]
pub struct DetectResponse {
    pub total: usize,
    pub anomalies_found: usize,
    pub results: Vec<AnomalyRecord>,
}

#[derive(Serialize)]
pub struct ForecastResponse {
    pub steps: usize,
    pub forecast: Vec<f64>,
}

#[derive(Serialize)]
pub struct SeverityCount {
    pub severity: String,
    pub count: i64,
}

#[derive(Serialize)]
pub struct SummaryResponse {
    pub total_detections: i64,
    pub anomalies: i64,
    pub detections_today: i64,
    pub by_severity: Vec<SeverityCount>,
    pub training_runs: i64,
    pub last_training_run: Option<TrainingRunRow>,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub train: LatencySnapshot,
    pub detect: LatencySnapshot,
    pub forecast: LatencySnapshot,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /train",
            "POST /detect",
            "GET /model/status",
            "POST /forecast",
            "GET /detections/recent",
            "GET /stats/summary",
            "GET /stats/latency"
        ]
    }))
}

fn parse_batch_body(body: &[u8]) -> Result<Vec<RawTransaction>, AppError> {
    let input: TransactionInput = serde_json::from_slice(body).map_err(|e| {
        AppError::validation("body", "{\"transactions\": [...]} or a JSON array", e.to_string())
    })?;
    let txs = input.into_transactions();
    if txs.is_empty() {
        return Err(AppError::validation("transactions", "a non-empty list", "[]"));
    }
    Ok(txs)
}

/// Fit on the posted batch, or on the configured address's history when the
/// body is empty, then persist artifacts and record the run.
async fn train(State(state): State<ApiState>, body: Bytes) -> Result<Json<TrainResponse>, AppError> {
    let (raw, source) = if body.iter().all(u8::is_ascii_whitespace) {
        (fetch_training_batch(&state.cfg, None).await?, TrainingSource::Etherscan)
    } else {
        (parse_batch_body(&body)?, TrainingSource::Request)
    };
    let records_in = raw.len();

    let _guard = state.model_lock.lock().await;
    let started = Instant::now();
    let pipeline = Arc::clone(&state.pipeline);
    let trained = tokio::task::spawn_blocking(move || pipeline.train(&raw)).await??;
    state.artifacts.save(&trained)?;
    let elapsed = started.elapsed();
    state.latency.record(Operation::Train, elapsed);

    let duration_ms = elapsed.as_secs_f64() * 1000.0;
    let training_run_id =
        insert_training_run(&state.pool, now_ns(), source, records_in, &trained, duration_ms).await?;
    info!(records_in, %source, duration_ms, "Model trained via API");

    Ok(Json(TrainResponse {
        status: "trained",
        source: source.to_string(),
        records_in,
        decision_threshold: trained.decision_threshold,
        thresholds: trained.thresholds,
        training_run_id,
        duration_ms,
    }))
}

async fn detect(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<DetectResponse>, AppError> {
    let raw = parse_batch_body(&body)?;

    let records = {
        let _guard = state.model_lock.lock().await;
        let started = Instant::now();
        let artifacts = state.artifacts.clone();
        let pipeline = Arc::clone(&state.pipeline);
        let records = tokio::task::spawn_blocking(move || {
            let detector = AnomalyDetector::from_state(artifacts.load()?);
            pipeline.detect(&raw, &detector)
        })
        .await??;
        state.latency.record(Operation::Detect, started.elapsed());
        records
    };

    let batch = DetectionBatch {
        records: records.clone(),
        detected_at_ns: now_ns(),
    };
    if let Err(e) = state.detections_tx.try_send(batch) {
        warn!("DB writer channel full: {e}");
    }

    let anomalies_found = records.iter().filter(|r| r.is_anomaly).count();
    Ok(Json(DetectResponse {
        total: records.len(),
        anomalies_found,
        results: records,
    }))
}

async fn model_status(State(state): State<ApiState>) -> Result<Response, AppError> {
    let status = match state.artifacts.status() {
        Ok(s) => s,
        Err(AppError::ArtifactNotFound { path }) => {
            let body = serde_json::json!({
                "status": "not_trained",
                "path": path.display().to_string(),
            });
            return Ok((StatusCode::NOT_FOUND, Json(body)).into_response());
        }
        Err(e) => return Err(e),
    };

    let last_run: Option<TrainingRunRow> =
        sqlx::query_as("SELECT * FROM training_runs ORDER BY id DESC LIMIT 1")
            .fetch_optional(&state.pool)
            .await?;

    Ok(Json(serde_json::json!({
        "status": "trained",
        "path": status.path,
        "size_bytes": status.size_bytes,
        "last_modified": status.last_modified.to_rfc3339(),
        "last_training_run": last_run,
    }))
    .into_response())
}

async fn forecast(
    State(state): State<ApiState>,
    Json(req): Json<ForecastRequest>,
) -> Result<Json<ForecastResponse>, AppError> {
    let steps = req.steps.unwrap_or(DEFAULT_FORECAST_STEPS);
    if steps == 0 || steps > MAX_FORECAST_STEPS {
        return Err(AppError::validation(
            "steps",
            format!("1..={MAX_FORECAST_STEPS}"),
            steps.to_string(),
        ));
    }
    if req.transactions.is_empty() {
        return Err(AppError::validation("transactions", "a non-empty list", "[]"));
    }

    let started = Instant::now();
    let pipeline = Arc::clone(&state.pipeline);
    let raw = req.transactions;
    let values = tokio::task::spawn_blocking(move || pipeline.forecast(&raw, steps)).await??;
    state.latency.record(Operation::Forecast, started.elapsed());

    Ok(Json(ForecastResponse {
        steps,
        forecast: values,
    }))
}

async fn get_recent_detections(
    State(state): State<ApiState>,
    Query(params): Query<RecentDetectionsQuery>,
) -> Result<Json<Vec<DetectionRow>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 1000);
    let anomalies_only = params.anomalies_only.unwrap_or(false);

    let rows: Vec<DetectionRow> = sqlx::query_as(
        r#"
        SELECT id, detected_at, transaction_hash, is_anomaly, severity, anomaly_types,
               value, gas, gas_price, tx_timestamp
        FROM detections
        WHERE is_anomaly >= ?
        ORDER BY detected_at DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(i64::from(anomalies_only))
    .bind(limit)
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows))
}

async fn get_stats_summary(
    State(state): State<ApiState>,
) -> Result<Json<SummaryResponse>, AppError> {
    let total_detections: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM detections")
        .fetch_one(&state.pool)
        .await?;
    let anomalies: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM detections WHERE is_anomaly = 1")
        .fetch_one(&state.pool)
        .await?;

    let day_ns = 24i64 * 3_600 * 1_000_000_000;
    let since = now_ns() - day_ns;
    let detections_today: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM detections WHERE detected_at > ?")
            .bind(since)
            .fetch_one(&state.pool)
            .await?;

    let by_severity: Vec<(String, i64)> = sqlx::query_as(
        "SELECT severity, COUNT(*) FROM detections GROUP BY severity ORDER BY COUNT(*) DESC",
    )
    .fetch_all(&state.pool)
    .await?;

    let training_runs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM training_runs")
        .fetch_one(&state.pool)
        .await?;
    let last_training_run: Option<TrainingRunRow> =
        sqlx::query_as("SELECT * FROM training_runs ORDER BY id DESC LIMIT 1")
            .fetch_optional(&state.pool)
            .await?;

    Ok(Json(SummaryResponse {
        total_detections,
        anomalies,
        detections_today,
        by_severity: by_severity
            .into_iter()
            .map(|(severity, count)| SeverityCount { severity, count })
            .collect(),
        training_runs,
        last_training_run,
    }))
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    Json(LatencyResponse {
        train: state.latency.snapshot(Operation::Train),
        detect: state.latency.snapshot(Operation::Detect),
        forecast: state.latency.snapshot(Operation::Forecast),
    })
}

fn now_ns() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::db::writer::DbWriter;

    struct Harness {
        app: Router,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let pool = crate::db::memory_pool().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (detections_tx, rx) = mpsc::channel(16);
        tokio::spawn(DbWriter::new(pool.clone(), rx).run());

        let cfg = Config {
            etherscan_api_url: "http://127.0.0.1:9".to_string(),
            etherscan_api_key: None,
            etherscan_address: None,
            request_timeout_secs: 1,
            log_level: "info".to_string(),
            log_dir: dir.path().display().to_string(),
            db_path: ":memory:".to_string(),
            api_port: 0,
            model_dir: dir.path().display().to_string(),
            contamination: 0.01,
            random_seed: 42,
            n_estimators: 100,
            report_unexplained: false,
            cleaning_workers: 1,
            arima_order: Default::default(),
        };
        let state = ApiState {
            pool,
            pipeline: Arc::new(Pipeline::from_config(&cfg)),
            artifacts: ArtifactStore::new(dir.path()),
            cfg: Arc::new(cfg),
            latency: Arc::new(LatencyStats::new().unwrap()),
            detections_tx,
            model_lock: Arc::new(Mutex::new(())),
        };
        Harness {
            app: router(state),
            _dir: dir,
        }
    }

    fn batch() -> Value {
        let values = [100, 200, 150, 0, 500, 600, 50000];
        let txs: Vec<Value> = values
            .iter()
            .enumerate()
            .map(|(i, v)| {
                json!({
                    "hash": format!("0x{i}"),
                    "timeStamp": (1_700_000_000 + i as i64 * 86_400).to_string(),
                    "value": v.to_string(),
                    "gas": "21000",
                    "gasPrice": "50"
                })
            })
            .collect();
        json!({ "transactions": txs })
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map_or_else(Body::empty, |b| Body::from(b.to_string()));
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn index_lists_endpoints() {
        let h = harness().await;
        let (status, body) = call(&h.app, "GET", "/", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["endpoints"].as_array().unwrap().len() >= 7);
    }

    #[tokio::test]
    async fn status_is_404_before_training() {
        let h = harness().await;
        let (status, body) = call(&h.app, "GET", "/model/status", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "not_trained");
    }

    #[tokio::test]
    async fn detect_without_model_is_bad_request() {
        let h = harness().await;
        let (status, body) = call(&h.app, "POST", "/detect", Some(batch())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("No model artifact"));
    }

    #[tokio::test]
    async fn train_then_detect() {
        let h = harness().await;

        let (status, body) = call(&h.app, "POST", "/train", Some(batch())).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["status"], "trained");
        assert_eq!(body["records_in"], 7);
        assert_eq!(body["thresholds"]["value"], 37650.0);

        let (status, body) = call(&h.app, "GET", "/model/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["last_training_run"]["source"], "request");

        let (status, body) = call(&h.app, "POST", "/detect", Some(batch())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 6);
        assert_eq!(body["anomalies_found"], 1);
        let flagged: Vec<&Value> = body["results"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|r| r["is_anomaly"] == true)
            .collect();
        assert_eq!(flagged[0]["transaction_details"]["value"], 50000.0);
        assert_eq!(flagged[0]["anomaly_types"][0]["type"], "high_value_transaction");

        let (_, latency) = call(&h.app, "GET", "/stats/latency", None).await;
        assert_eq!(latency["train"]["samples"], 1);
        assert_eq!(latency["detect"]["samples"], 1);
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let h = harness().await;
        let (status, _) = call(&h.app, "POST", "/detect", Some(json!({"transactions": []}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn forecast_endpoint_returns_requested_steps() {
        let h = harness().await;
        let mut req = batch();
        req["steps"] = json!(3);
        let (status, body) = call(&h.app, "POST", "/forecast", Some(req)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["forecast"].as_array().unwrap().len(), 3);

        let (status, _) = call(&h.app, "POST", "/forecast", Some(json!({"transactions": [], "steps": 0}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn summary_counts_training_runs() {
        let h = harness().await;
        call(&h.app, "POST", "/train", Some(batch())).await;
        let (status, body) = call(&h.app, "GET", "/stats/summary", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["training_runs"], 1);
    }
}
