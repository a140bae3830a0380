//! In-memory latency histograms for model operations served over HTTP.

use std::sync::Mutex;
use std::time::Duration;

use hdrhistogram::Histogram;
use serde::Serialize;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Train,
    Detect,
    Forecast,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LatencySnapshot {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
    pub max_ms: Option<f64>,
}

/// Shared by handlers: each records its wall time, `/stats/latency` reads.
/// Values are stored in microseconds, 1us to 1h, 3 significant figures.
pub struct LatencyStats {
    train: Mutex<Histogram<u64>>,
    detect: Mutex<Histogram<u64>>,
    forecast: Mutex<Histogram<u64>>,
}

fn histogram() -> Result<Mutex<Histogram<u64>>> {
    Histogram::new_with_bounds(1, 3_600_000_000, 3)
        .map(Mutex::new)
        .map_err(|e| AppError::Config(format!("latency histogram: {e}")))
}

impl LatencyStats {
    pub fn new() -> Result<Self> {
        Ok(Self {
            train: histogram()?,
            detect: histogram()?,
            forecast: histogram()?,
        })
    }

    fn slot(&self, op: Operation) -> &Mutex<Histogram<u64>> {
        match op {
            Operation::Train => &self.train,
            Operation::Detect => &self.detect,
            Operation::Forecast => &self.forecast,
        }
    }

    pub fn record(&self, op: Operation, d: Duration) {
        let us = d.as_micros().clamp(1, 3_600_000_000) as u64;
        if let Ok(mut h) = self.slot(op).lock() {
            let _ = h.record(us);
        }
    }

    pub fn snapshot(&self, op: Operation) -> LatencySnapshot {
        let empty = LatencySnapshot {
            samples: 0,
            p50_ms: None,
            p95_ms: None,
            p99_ms: None,
            max_ms: None,
        };
        let Ok(h) = self.slot(op).lock() else {
            return empty;
        };
        if h.len() == 0 {
            return empty;
        }
        let ms = |us: u64| us as f64 / 1000.0;
        LatencySnapshot {
            samples: h.len(),
            p50_ms: Some(ms(h.value_at_quantile(0.5))),
            p95_ms: Some(ms(h.value_at_quantile(0.95))),
            p99_ms: Some(ms(h.value_at_quantile(0.99))),
            max_ms: Some(ms(h.max())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let stats = LatencyStats::new().unwrap();
        let snap = stats.snapshot(Operation::Detect);
        assert_eq!(snap.samples, 0);
        assert_eq!(snap.p50_ms, None);
    }

    #[test]
    fn operations_are_tracked_separately() {
        let stats = LatencyStats::new().unwrap();
        for ms in [1, 2, 3, 4, 100] {
            stats.record(Operation::Detect, Duration::from_millis(ms));
        }
        stats.record(Operation::Train, Duration::from_secs(2));

        let detect = stats.snapshot(Operation::Detect);
        assert_eq!(detect.samples, 5);
        let p50 = detect.p50_ms.unwrap();
        assert!((1.9..=3.1).contains(&p50), "p50 {p50}");
        assert!(detect.max_ms.unwrap() >= 99.0);

        assert_eq!(stats.snapshot(Operation::Train).samples, 1);
        assert_eq!(stats.snapshot(Operation::Forecast).samples, 0);
    }
}
