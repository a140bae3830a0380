use crate::error::{AppError, Result};

pub const ETHERSCAN_API_URL: &str = "https://api.etherscan.io/api";

/// Percentile of each raw training feature used as the explanation cutoff.
pub const THRESHOLD_PERCENTILE: f64 = 95.0;

/// Upper bound on the subsample drawn for each isolation tree.
pub const MAX_SAMPLES: usize = 256;

/// Block estimate for `get_recent_transactions`, assuming ~15s block time.
pub const BLOCKS_PER_DAY: u64 = 24 * 60 * 60 / 15;

/// Highest block number accepted by the txlist endpoint.
pub const END_BLOCK: u64 = 99_999_999;

/// Channel capacity for detection batches routed to the DB writer.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Default number of forecast steps (days) when a caller does not pass one.
pub const DEFAULT_FORECAST_STEPS: usize = 10;

/// Artifact file names inside the model directory.
pub mod artifacts {
    pub const FOREST_FILE: &str = "isolation_forest.json";
    pub const SCALER_FILE: &str = "scaler.json";
    pub const THRESHOLDS_FILE: &str = "thresholds.json";
}

/// ARIMA (p, d, q) order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArimaOrder {
    pub p: usize,
    pub d: usize,
    pub q: usize,
}

impl Default for ArimaOrder {
    fn default() -> Self {
        Self { p: 5, d: 1, q: 0 }
    }
}

impl std::str::FromStr for ArimaOrder {
    type Err = AppError;

    /// Parses `"p,d,q"`, e.g. `"5,1,0"`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<usize> = s
            .split(',')
            .map(|p| p.trim().parse::<usize>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| AppError::Config(format!("ARIMA_ORDER must be `p,d,q`, got `{s}`")))?;
        match parts.as_slice() {
            [p, d, q] => Ok(Self { p: *p, d: *d, q: *q }),
            _ => Err(AppError::Config(format!("ARIMA_ORDER must be `p,d,q`, got `{s}`"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub etherscan_api_url: String,
    /// ETHERSCAN_API_KEY. Required only for `--fetch` and body-less `/train`.
    pub etherscan_api_key: Option<String>,
    /// ETHERSCAN_ADDRESS. Account whose history is fetched for training.
    pub etherscan_address: Option<String>,
    pub request_timeout_secs: u64,
    pub log_level: String,
    pub log_dir: String,
    pub db_path: String,
    pub api_port: u16,
    pub model_dir: String,
    /// Expected outlier fraction of the training batch (CONTAMINATION).
    pub contamination: f64,
    pub random_seed: u64,
    pub n_estimators: usize,
    /// Emit `unexplained_anomaly` instead of `normal` for outliers no rule explains.
    pub report_unexplained: bool,
    /// Workers for the partitioned cleaning path; 1 keeps cleaning sequential.
    pub cleaning_workers: usize,
    pub arima_order: ArimaOrder,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let contamination = std::env::var("CONTAMINATION")
            .unwrap_or_else(|_| "0.01".to_string())
            .parse::<f64>()
            .map_err(|_| AppError::Config("CONTAMINATION must be a number".to_string()))?;
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(AppError::Config(format!(
                "CONTAMINATION must be in (0, 0.5], got {contamination}"
            )));
        }

        Ok(Self {
            etherscan_api_url: std::env::var("ETHERSCAN_API_URL")
                .unwrap_or_else(|_| ETHERSCAN_API_URL.to_string()),
            etherscan_api_key: std::env::var("ETHERSCAN_API_KEY").ok().filter(|s| !s.is_empty()),
            etherscan_address: std::env::var("ETHERSCAN_ADDRESS").ok().filter(|s| !s.is_empty()),
            request_timeout_secs: std::env::var("REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse::<u64>()
                .unwrap_or(10),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_dir: std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "anomaly.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            model_dir: std::env::var("MODEL_DIR").unwrap_or_else(|_| "models".to_string()),
            contamination,
            random_seed: std::env::var("RANDOM_SEED")
                .unwrap_or_else(|_| "42".to_string())
                .parse::<u64>()
                .unwrap_or(42),
            n_estimators: std::env::var("N_ESTIMATORS")
                .unwrap_or_else(|_| "100".to_string())
                .parse::<usize>()
                .unwrap_or(100)
                .max(1),
            report_unexplained: std::env::var("REPORT_UNEXPLAINED")
                .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            cleaning_workers: std::env::var("CLEANING_WORKERS")
                .unwrap_or_else(|_| "1".to_string())
                .parse::<usize>()
                .unwrap_or(1)
                .max(1),
            arima_order: match std::env::var("ARIMA_ORDER") {
                Ok(s) => s.parse()?,
                Err(_) => ArimaOrder::default(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_arima_order() {
        let order: ArimaOrder = "2, 1, 1".parse().unwrap();
        assert_eq!(order, ArimaOrder { p: 2, d: 1, q: 1 });
        assert!("5,1".parse::<ArimaOrder>().is_err());
        assert!("a,b,c".parse::<ArimaOrder>().is_err());
    }

    #[test]
    fn blocks_per_day_assumes_fifteen_second_blocks() {
        assert_eq!(BLOCKS_PER_DAY, 5760);
    }
}
