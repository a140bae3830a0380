mod api;
mod config;
mod db;
mod detector;
mod error;
mod fetcher;
mod forecast;
mod ingest;
mod logging;
mod pipeline;
mod store;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info};

use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::config::{Config, CHANNEL_CAPACITY, DEFAULT_FORECAST_STEPS};
use crate::db::models::TrainingSource;
use crate::db::writer::{insert_training_run, DbWriter};
use crate::detector::{AnomalyDetector, TrainedState};
use crate::error::{AppError, Result};
use crate::pipeline::Pipeline;
use crate::store::ArtifactStore;
use crate::types::{RawTransaction, TransactionInput};

#[derive(Parser)]
#[command(name = "chain-anomaly", version, about = "Blockchain transaction anomaly detection")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API (default).
    Serve,
    /// Train the outlier model and save its artifacts.
    Train {
        /// JSON file: `{"transactions": [...]}` or a bare array.
        #[arg(long, conflicts_with = "fetch")]
        input: Option<PathBuf>,
        /// Fetch ETHERSCAN_ADDRESS history instead of reading a file.
        #[arg(long)]
        fetch: bool,
        /// With --fetch, only the last N days.
        #[arg(long, requires = "fetch")]
        days: Option<u64>,
    },
    /// Score transactions from a file.
    Detect {
        #[arg(long)]
        input: PathBuf,
        /// Write results here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
        /// Retrain on the input first.
        #[arg(long)]
        train: bool,
    },
    /// Forecast daily transaction value.
    Forecast {
        #[arg(long)]
        input: PathBuf,
        #[arg(long, default_value_t = DEFAULT_FORECAST_STEPS)]
        steps: usize,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    let log_guard = match logging::init(&cfg) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Logging error: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(cfg).await,
        Command::Train { input, fetch, days } => train(&cfg, input, fetch, days).await,
        Command::Detect {
            input,
            output,
            train,
        } => detect(&cfg, &input, output.as_deref(), train).await,
        Command::Forecast { input, steps } => forecast(&cfg, &input, steps),
    };

    if let Err(e) = result {
        error!("Fatal error: {e}");
        drop(log_guard);
        std::process::exit(1);
    }
}

async fn serve(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool = db::connect(&cfg.db_path).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- DB writer ---
    let (detections_tx, detections_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let writer = DbWriter::new(pool.clone(), detections_rx);
    tokio::spawn(async move { writer.run().await });

    // --- HTTP API server ---
    let artifacts = ArtifactStore::new(&cfg.model_dir);
    if artifacts.exists() {
        info!(dir = %artifacts.dir().display(), "Existing model artifacts found");
    } else {
        info!("No model artifacts yet; POST /train to create them");
    }

    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let state = ApiState {
        pool,
        pipeline: Arc::new(Pipeline::from_config(&cfg)),
        artifacts,
        cfg: Arc::new(cfg),
        latency: Arc::new(LatencyStats::new()?),
        detections_tx,
        model_lock: Arc::new(Mutex::new(())),
    };
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("HTTP API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
}

async fn train(cfg: &Config, input: Option<PathBuf>, fetch: bool, days: Option<u64>) -> Result<()> {
    let (raw, source) = match (input, fetch) {
        (Some(path), _) => (read_input(&path)?, TrainingSource::File),
        (None, true) => (
            fetcher::fetch_training_batch(cfg, days).await?,
            TrainingSource::Etherscan,
        ),
        (None, false) => {
            return Err(AppError::Config(
                "train needs --input FILE or --fetch".to_string(),
            ))
        }
    };

    let pool = db::connect(&cfg.db_path).await?;
    let artifacts = ArtifactStore::new(&cfg.model_dir);
    let (trained, training_run_id) =
        train_and_record(&Pipeline::from_config(cfg), &pool, &artifacts, &raw, source).await?;

    let summary = serde_json::json!({
        "status": "trained",
        "source": source.to_string(),
        "training_run_id": training_run_id,
        "records_in": raw.len(),
        "model_dir": artifacts.dir().display().to_string(),
        "decision_threshold": trained.decision_threshold,
        "thresholds": trained.thresholds,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

/// Fit on `raw`, save the artifacts and record the run. Returns the
/// trained state and the `training_runs` row id.
async fn train_and_record(
    pipeline: &Pipeline,
    pool: &SqlitePool,
    artifacts: &ArtifactStore,
    raw: &[RawTransaction],
    source: TrainingSource,
) -> Result<(TrainedState, i64)> {
    let started = Instant::now();
    let trained = pipeline.train(raw)?;
    artifacts.save(&trained)?;
    let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

    let trained_at_ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let id = insert_training_run(pool, trained_at_ns, source, raw.len(), &trained, duration_ms).await?;
    info!(records_in = raw.len(), %source, duration_ms, "Model trained");
    Ok((trained, id))
}

async fn detect(cfg: &Config, input: &Path, output: Option<&Path>, retrain: bool) -> Result<()> {
    let raw = read_input(input)?;
    let pipeline = Pipeline::from_config(cfg);
    let artifacts = ArtifactStore::new(&cfg.model_dir);

    let trained = if retrain || !artifacts.exists() {
        info!("Training model on input before detection");
        let pool = db::connect(&cfg.db_path).await?;
        let (trained, _) =
            train_and_record(&pipeline, &pool, &artifacts, &raw, TrainingSource::File).await?;
        trained
    } else {
        artifacts.load()?
    };

    let records = pipeline.detect(&raw, &AnomalyDetector::from_state(trained))?;
    let anomalies = records.iter().filter(|r| r.is_anomaly).count();
    let json = serde_json::to_string_pretty(&records)?;
    match output {
        Some(path) => {
            std::fs::write(path, json)?;
            info!(path = %path.display(), "Results written");
        }
        None => println!("{json}"),
    }
    info!(total = records.len(), anomalies, "Detection finished");
    Ok(())
}

fn forecast(cfg: &Config, input: &Path, steps: usize) -> Result<()> {
    let raw = read_input(input)?;
    let values = Pipeline::from_config(cfg).forecast(&raw, steps)?;
    let out = serde_json::json!({ "steps": steps, "forecast": values });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<RawTransaction>> {
    let bytes = std::fs::read(path)?;
    let txs = serde_json::from_slice::<TransactionInput>(&bytes)?.into_transactions();
    if txs.is_empty() {
        return Err(AppError::validation(
            "transactions",
            "at least one record",
            "No transactions found in input file",
        ));
    }
    info!(path = %path.display(), records = txs.len(), "Loaded input file");
    Ok(txs)
}
