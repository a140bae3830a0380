use serde::{Deserialize, Serialize};

use crate::detector::features::{FeatureMatrix, GAS, GAS_PRICE, TOTAL_GAS_COST, VALUE, VALUE_PER_GAS};
use crate::error::{AppError, Result};

/// Percentile with linear interpolation between closest ranks
/// (`pos = p/100 * (n - 1)`). Returns `None` for an empty slice.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = (p.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Per-feature explanation cutoffs, computed once from the raw training batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdTable {
    pub value: f64,
    pub gas: f64,
    #[serde(rename = "gasPrice")]
    pub gas_price: f64,
    /// `None` when no training row had a defined ratio (every gas was zero).
    pub value_per_gas: Option<f64>,
    pub total_gas_cost: f64,
}

impl ThresholdTable {
    pub fn compute(features: &FeatureMatrix, p: f64) -> Result<Self> {
        if features.is_empty() {
            return Err(AppError::validation("batch", "at least one row", "0 rows"));
        }
        let column = |j: usize| features.data.column(j).to_vec();
        let at = |j: usize| percentile(&column(j), p).unwrap_or(0.0);

        let ratios: Vec<f64> = features
            .data
            .column(VALUE_PER_GAS)
            .iter()
            .zip(&features.ratio_defined)
            .filter_map(|(v, defined)| defined.then_some(*v))
            .collect();

        Ok(Self {
            value: at(VALUE),
            gas: at(GAS),
            gas_price: at(GAS_PRICE),
            value_per_gas: percentile(&ratios, p),
            total_gas_cost: at(TOTAL_GAS_COST),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::features;
    use crate::types::Transaction;

    #[test]
    fn percentile_interpolates_linearly() {
        let v = [100.0, 150.0, 200.0, 500.0, 600.0, 50000.0];
        // pos = 0.95 * 5 = 4.75 -> 600 + 0.75 * 49400
        assert_eq!(percentile(&v, 95.0), Some(37650.0));
        assert_eq!(percentile(&v, 0.0), Some(100.0));
        assert_eq!(percentile(&v, 100.0), Some(50000.0));
        assert_eq!(percentile(&[7.0], 95.0), Some(7.0));
        assert_eq!(percentile(&[], 95.0), None);
    }

    #[test]
    fn ratio_threshold_skips_zero_gas_rows() {
        let tx = |value: f64, gas: f64| Transaction {
            hash: None,
            timestamp: None,
            value: Some(value),
            gas: Some(gas),
            gas_price: Some(1.0),
        };
        let m = features::build(&[tx(10.0, 0.0), tx(10.0, 5.0), tx(20.0, 5.0)]);
        let table = ThresholdTable::compute(&m, 95.0).unwrap();
        // ratios considered: [2, 4] -> 2 + 0.95 * 2
        let ratio = table.value_per_gas.unwrap();
        assert!((ratio - 3.9).abs() < 1e-12);

        let all_zero = features::build(&[tx(10.0, 0.0)]);
        assert_eq!(ThresholdTable::compute(&all_zero, 95.0).unwrap().value_per_gas, None);
    }
}
