use std::fs::{self, File, OpenOptions};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::error::{AppError, Result};

/// Keeps the log file handle alive and syncs it to disk on drop.
/// Hold it in `main` until shutdown.
pub struct LogGuard {
    file: Arc<File>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        let _ = self.file.sync_all();
    }
}

/// Bare levels get quieter defaults for chatty dependencies; full directive
/// strings are taken as-is.
fn filter_spec(level: &str) -> String {
    let level = level.trim();
    if level.contains(',') || level.contains('=') {
        level.to_string()
    } else {
        format!("{level},hyper=info,hyper_util=info,reqwest=info,sqlx=warn")
    }
}

/// Install the global subscriber: stderr plus `{log_dir}/app_YYYYMMDD.log`.
pub fn init(cfg: &Config) -> Result<LogGuard> {
    fs::create_dir_all(&cfg.log_dir)?;
    let path = PathBuf::from(&cfg.log_dir).join(format!(
        "app_{}.log",
        chrono::Utc::now().format("%Y%m%d")
    ));
    let file = Arc::new(OpenOptions::new().create(true).append(true).open(&path)?);

    let spec = filter_spec(&cfg.log_level);
    let filter = EnvFilter::from_str(&spec).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(fmt::layer().with_writer(Arc::clone(&file)).with_ansi(false))
        .try_init()
        .map_err(|e| AppError::Config(format!("logging already initialised: {e}")))?;

    tracing::info!(log_file = %path.display(), filter = %spec, "Logging initialized");
    Ok(LogGuard { file })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_level_gets_dependency_overrides() {
        assert_eq!(
            filter_spec("debug"),
            "debug,hyper=info,hyper_util=info,reqwest=info,sqlx=warn"
        );
        assert_eq!(filter_spec("chain_anomaly=trace"), "chain_anomaly=trace");
    }
}
