//! Daily transaction-volume trend forecasting.

pub mod arima;

pub use arima::ArimaModel;

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use tracing::debug;

use crate::types::Transaction;

/// Sum transaction value per UTC day.
///
/// Days without activity inside the observed range count as zero, and zero
/// days are then forward-filled from the last non-zero day. Leading zero days
/// are dropped. Records without a timestamp are skipped.
pub fn daily_series(txs: &[Transaction]) -> Vec<(NaiveDate, f64)> {
    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for tx in txs {
        if let Some(ts) = tx.timestamp {
            *by_day.entry(ts.date_naive()).or_insert(0.0) += tx.value.unwrap_or(0.0);
        }
    }

    let (Some(first), Some(last)) = (
        by_day.keys().next().copied(),
        by_day.keys().next_back().copied(),
    ) else {
        return Vec::new();
    };

    let mut series = Vec::new();
    let mut carry: Option<f64> = None;
    let mut day = first;
    while day <= last {
        let total = by_day.get(&day).copied().unwrap_or(0.0);
        if total != 0.0 {
            carry = Some(total);
        }
        if let Some(v) = carry {
            series.push((day, v));
        }
        day += Duration::days(1);
    }

    debug!(days = series.len(), "Daily value series prepared");
    series
}
