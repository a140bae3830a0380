//! Feature matrix construction.
//!
//! Every cleaned transaction maps to one fixed-width row in [`FEATURE_NAMES`]
//! order. Rows with `gas == 0` have no defined value/gas ratio; the model
//! receives `0.0` for that cell and the row is marked in `ratio_defined`.

use ndarray::Array2;

use crate::types::Transaction;

pub const FEATURE_NAMES: [&str; 5] = ["value", "gas", "gasPrice", "value_per_gas", "total_gas_cost"];
pub const N_FEATURES: usize = FEATURE_NAMES.len();

pub const VALUE: usize = 0;
pub const GAS: usize = 1;
pub const GAS_PRICE: usize = 2;
pub const VALUE_PER_GAS: usize = 3;
pub const TOTAL_GAS_COST: usize = 4;

#[derive(Debug, Clone)]
pub struct FeatureMatrix {
    pub data: Array2<f64>,
    /// False where gas was zero and `value_per_gas` is a placeholder.
    pub ratio_defined: Vec<bool>,
}

impl FeatureMatrix {
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Raw (unscaled) feature values of row `i`.
    pub fn row(&self, i: usize) -> [f64; N_FEATURES] {
        let mut out = [0.0; N_FEATURES];
        for (j, v) in self.data.row(i).iter().enumerate() {
            out[j] = *v;
        }
        out
    }
}

/// Build the feature matrix for a cleaned batch. Missing numerics count as 0.
pub fn build(txs: &[Transaction]) -> FeatureMatrix {
    let mut data = Array2::<f64>::zeros((txs.len(), N_FEATURES));
    let mut ratio_defined = Vec::with_capacity(txs.len());

    for (i, tx) in txs.iter().enumerate() {
        let value = tx.value.unwrap_or(0.0);
        let gas = tx.gas.unwrap_or(0.0);
        let gas_price = tx.gas_price.unwrap_or(0.0);

        let ratio = (gas > 0.0).then(|| value / gas).filter(|r| r.is_finite());
        let total = gas * gas_price;

        data[[i, VALUE]] = value;
        data[[i, GAS]] = gas;
        data[[i, GAS_PRICE]] = gas_price;
        data[[i, VALUE_PER_GAS]] = ratio.unwrap_or(0.0);
        data[[i, TOTAL_GAS_COST]] = if total.is_finite() { total } else { 0.0 };
        ratio_defined.push(ratio.is_some());
    }

    FeatureMatrix { data, ratio_defined }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(value: f64, gas: f64, gas_price: f64) -> Transaction {
        Transaction {
            hash: None,
            timestamp: None,
            value: Some(value),
            gas: Some(gas),
            gas_price: Some(gas_price),
        }
    }

    #[test]
    fn column_order_is_stable() {
        assert_eq!(
            FEATURE_NAMES,
            ["value", "gas", "gasPrice", "value_per_gas", "total_gas_cost"]
        );
        let m = build(&[tx(42000.0, 21000.0, 50.0)]);
        assert_eq!(m.row(0), [42000.0, 21000.0, 50.0, 2.0, 1_050_000.0]);
        assert!(m.ratio_defined[0]);
    }

    #[test]
    fn zero_gas_yields_finite_placeholder() {
        let m = build(&[tx(100.0, 0.0, 50.0)]);
        assert!(m.data.iter().all(|v| v.is_finite()));
        assert_eq!(m.data[[0, VALUE_PER_GAS]], 0.0);
        assert!(!m.ratio_defined[0]);
    }

    #[test]
    fn rows_keep_input_order() {
        let m = build(&[tx(1.0, 1.0, 1.0), tx(2.0, 1.0, 1.0), tx(3.0, 1.0, 1.0)]);
        let values: Vec<f64> = m.data.column(VALUE).to_vec();
        assert_eq!(values, vec![1.0, 2.0, 3.0]);
    }
}
