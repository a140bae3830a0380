use crate::detector::features::{GAS, GAS_PRICE, N_FEATURES, VALUE, VALUE_PER_GAS};
use crate::detector::thresholds::ThresholdTable;
use crate::types::{AnomalyKind, AnomalyReason, Severity};

/// Explain a scored row against the threshold table.
///
/// Inliers always get a single `normal` reason. Outliers are checked in fixed
/// order: value, gas, gasPrice, value/gas ratio; every rule that exceeds its
/// threshold contributes one reason. An outlier no rule explains is reported
/// as `normal`, or as `unexplained_anomaly` when `report_unexplained` is set.
/// `ratio_defined = false` rows never trigger the ratio rule.
pub fn classify(
    row: &[f64; N_FEATURES],
    ratio_defined: bool,
    is_outlier: bool,
    thresholds: &ThresholdTable,
    report_unexplained: bool,
) -> Vec<AnomalyReason> {
    if !is_outlier {
        return vec![AnomalyReason::normal()];
    }

    let mut reasons = Vec::new();

    if row[VALUE] > thresholds.value {
        reasons.push(AnomalyReason {
            kind: AnomalyKind::HighValueTransaction,
            severity: Severity::High,
            details: format!(
                "Transaction value ({}) exceeds threshold ({})",
                row[VALUE], thresholds.value
            ),
        });
    }

    if row[GAS] > thresholds.gas {
        reasons.push(AnomalyReason {
            kind: AnomalyKind::HighGasConsumption,
            severity: Severity::Medium,
            details: format!(
                "Gas consumption ({}) exceeds threshold ({})",
                row[GAS], thresholds.gas
            ),
        });
    }

    if row[GAS_PRICE] > thresholds.gas_price {
        reasons.push(AnomalyReason {
            kind: AnomalyKind::HighGasPrice,
            severity: Severity::Medium,
            details: format!(
                "Gas price ({}) exceeds threshold ({})",
                row[GAS_PRICE], thresholds.gas_price
            ),
        });
    }

    if let Some(limit) = thresholds.value_per_gas.filter(|_| ratio_defined) {
        if row[VALUE_PER_GAS] > limit {
            reasons.push(AnomalyReason {
                kind: AnomalyKind::UnusualValueGasRatio,
                severity: Severity::Low,
                details: format!(
                    "Value/gas ratio ({}) exceeds threshold ({})",
                    row[VALUE_PER_GAS], limit
                ),
            });
        }
    }

    if reasons.is_empty() {
        if report_unexplained {
            reasons.push(AnomalyReason {
                kind: AnomalyKind::UnexplainedAnomaly,
                severity: Severity::Low,
                details: "Outlier not explained by any feature threshold".to_string(),
            });
        } else {
            reasons.push(AnomalyReason::normal());
        }
    }

    reasons
}
