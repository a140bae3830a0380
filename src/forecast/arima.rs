//! ARIMA(p, d, q) fitted by least squares.
//!
//! The series is differenced `d` times. AR terms are estimated by ordinary
//! least squares on lagged values; when `q > 0` the MA terms come from a
//! two-stage Hannan–Rissanen regression (a long AR fit supplies residual
//! estimates, which are then used as extra regressors). A small ridge term
//! keeps the normal equations solvable on short or collinear series.
//! Forecasts are produced recursively with future shocks set to zero and
//! integrated back to the original scale.

use tracing::debug;

use crate::config::ArimaOrder;
use crate::error::{AppError, Result};

const RIDGE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq)]
struct FittedArima {
    intercept: f64,
    ar: Vec<f64>,
    ma: Vec<f64>,
    /// Differenced series the model was fitted on.
    w: Vec<f64>,
    /// In-sample residuals aligned with `w` (zero where not estimable).
    residuals: Vec<f64>,
    /// Last observed value of each differencing level `0..d`.
    tails: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct ArimaModel {
    order: ArimaOrder,
    fitted: Option<FittedArima>,
}

impl ArimaModel {
    pub fn new(order: ArimaOrder) -> Self {
        Self { order, fitted: None }
    }

    pub fn fit(&mut self, series: &[f64]) -> Result<()> {
        let ArimaOrder { p, d, q } = self.order;

        let mut level = series.to_vec();
        let mut tails = Vec::with_capacity(d);
        for _ in 0..d {
            let Some(last) = level.last().copied() else {
                break;
            };
            tails.push(last);
            level = level.windows(2).map(|w| w[1] - w[0]).collect();
        }
        let w = level;
        if w.len() < 2 || tails.len() < d {
            return Err(AppError::validation(
                "series",
                format!("at least {} daily observations for d={d}", d + 2),
                format!("{} observations", series.len()),
            ));
        }

        let p = p.min(w.len() - 1);
        let with_intercept = d == 0;

        let (mut intercept, mut ar, mut ma) = (0.0, Vec::new(), Vec::new());
        let mut q_used = 0;

        if q > 0 {
            // Stage 1: long autoregression for residual estimates.
            let m = (p + q).max(1).min(w.len() - 1);
            let (c, phi) = fit_ar(&w, m, with_intercept);
            let innov = residuals(&w, c, &phi, &[]);

            let q_eff = q.min(w.len().saturating_sub(m + 1));
            let start = p.max(m + q_eff);
            if q_eff > 0 && start < w.len() {
                let rows: Vec<Vec<f64>> = (start..w.len())
                    .map(|t| {
                        let mut x = Vec::with_capacity(1 + p + q_eff);
                        if with_intercept {
                            x.push(1.0);
                        }
                        x.extend((1..=p).map(|i| w[t - i]));
                        x.extend((1..=q_eff).map(|j| innov[t - j]));
                        x
                    })
                    .collect();
                let y: Vec<f64> = (start..w.len()).map(|t| w[t]).collect();
                let beta = least_squares(&rows, &y);
                let offset = usize::from(with_intercept);
                if with_intercept {
                    intercept = beta[0];
                }
                ar = beta[offset..offset + p].to_vec();
                ma = beta[offset + p..].to_vec();
                q_used = q_eff;
            }
        }

        if q_used == 0 {
            let (c, phi) = fit_ar(&w, p, with_intercept);
            intercept = c;
            ar = phi;
            ma.clear();
        }

        let residuals = residuals(&w, intercept, &ar, &ma);

        debug!(
            p,
            d,
            q = q_used,
            observations = series.len(),
            ?ar,
            ?ma,
            intercept,
            "ARIMA fitted"
        );

        self.fitted = Some(FittedArima {
            intercept,
            ar,
            ma,
            w,
            residuals,
            tails,
        });
        Ok(())
    }

    /// Forecast `steps` values past the end of the fitted series.
    pub fn forecast(&self, steps: usize) -> Result<Vec<f64>> {
        let fitted = self.fitted.as_ref().ok_or(AppError::NotFitted("ARIMA model"))?;

        let mut w = fitted.w.clone();
        let mut eps = fitted.residuals.clone();
        let mut diffs = Vec::with_capacity(steps);
        for _ in 0..steps {
            let n = w.len();
            let pred = fitted.intercept
                + fitted.ar.iter().enumerate().map(|(i, a)| a * w[n - 1 - i]).sum::<f64>()
                + fitted.ma.iter().enumerate().map(|(j, b)| b * eps[n - 1 - j]).sum::<f64>();
            w.push(pred);
            eps.push(0.0);
            diffs.push(pred);
        }

        let mut out = diffs;
        for tail in fitted.tails.iter().rev() {
            let mut last = *tail;
            out = out
                .into_iter()
                .map(|v| {
                    last += v;
                    last
                })
                .collect();
        }

        if let Some(bad) = out.iter().find(|v| !v.is_finite()) {
            return Err(AppError::validation("forecast", "finite values", bad.to_string()));
        }
        Ok(out)
    }
}

/// Fit `w_t = c + Σ φ_i w_{t-i}` over `t >= p`. Returns `(c, φ)`.
fn fit_ar(w: &[f64], p: usize, with_intercept: bool) -> (f64, Vec<f64>) {
    if p == 0 {
        let c = if with_intercept {
            w.iter().sum::<f64>() / w.len().max(1) as f64
        } else {
            0.0
        };
        return (c, Vec::new());
    }

    let rows: Vec<Vec<f64>> = (p..w.len())
        .map(|t| {
            let mut x = Vec::with_capacity(p + 1);
            if with_intercept {
                x.push(1.0);
            }
            x.extend((1..=p).map(|i| w[t - i]));
            x
        })
        .collect();
    let y: Vec<f64> = (p..w.len()).map(|t| w[t]).collect();
    let beta = least_squares(&rows, &y);
    if with_intercept {
        (beta[0], beta[1..].to_vec())
    } else {
        (0.0, beta)
    }
}

/// One-step in-sample residuals; zero where the lags are not all available.
fn residuals(w: &[f64], c: f64, ar: &[f64], ma: &[f64]) -> Vec<f64> {
    let start = ar.len().max(ma.len());
    let mut e = vec![0.0; w.len()];
    for t in start..w.len() {
        let pred = c
            + ar.iter().enumerate().map(|(i, a)| a * w[t - 1 - i]).sum::<f64>()
            + ma.iter().enumerate().map(|(j, b)| b * e[t - 1 - j]).sum::<f64>();
        e[t] = w[t] - pred;
    }
    e
}

/// Ridge-stabilised least squares via the normal equations.
fn least_squares(x: &[Vec<f64>], y: &[f64]) -> Vec<f64> {
    let k = x.first().map_or(0, Vec::len);
    if k == 0 {
        return Vec::new();
    }

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for (row, target) in x.iter().zip(y) {
        for i in 0..k {
            xty[i] += row[i] * target;
            for j in 0..k {
                xtx[i][j] += row[i] * row[j];
            }
        }
    }

    let diag_mean = (0..k).map(|i| xtx[i][i]).sum::<f64>() / k as f64;
    let lambda = RIDGE * diag_mean.max(1.0);
    for (i, row) in xtx.iter_mut().enumerate() {
        row[i] += lambda;
    }

    solve(xtx, xty).unwrap_or_else(|| vec![0.0; k])
}

/// Gaussian elimination with partial pivoting. `None` if singular.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < f64::EPSILON {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn order(p: usize, d: usize, q: usize) -> ArimaOrder {
        ArimaOrder { p, d, q }
    }

    #[test]
    fn forecast_before_fit_is_not_fitted() {
        let model = ArimaModel::new(ArimaOrder::default());
        assert!(matches!(model.forecast(3), Err(AppError::NotFitted(_))));
    }

    #[test]
    fn linear_trend_is_extended() {
        let series = [100.0, 200.0, 300.0, 400.0, 500.0, 600.0, 700.0];
        let mut model = ArimaModel::new(ArimaOrder::default());
        model.fit(&series).unwrap();
        let fc = model.forecast(3).unwrap();
        assert_eq!(fc.len(), 3);
        for (got, want) in fc.iter().zip([800.0, 900.0, 1000.0]) {
            assert!((got - want).abs() < 1.0, "got {got}, want {want}");
        }
    }

    #[test]
    fn moving_average_terms_produce_finite_forecasts() {
        let series: Vec<f64> = (0..30)
            .map(|i| 1000.0 + 10.0 * i as f64 + if i % 2 == 0 { 25.0 } else { -25.0 })
            .collect();
        let mut model = ArimaModel::new(order(2, 1, 1));
        model.fit(&series).unwrap();
        let fc = model.forecast(5).unwrap();
        assert_eq!(fc.len(), 5);
        assert!(fc.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn stationary_series_uses_intercept() {
        let series = [50.0; 12];
        let mut model = ArimaModel::new(order(1, 0, 0));
        model.fit(&series).unwrap();
        for v in model.forecast(4).unwrap() {
            assert!((v - 50.0).abs() < 1e-3, "got {v}");
        }
    }

    #[test]
    fn too_short_series_is_rejected() {
        let mut model = ArimaModel::new(order(5, 1, 0));
        assert!(matches!(
            model.fit(&[1.0, 2.0]),
            Err(AppError::Validation { .. })
        ));
    }

    #[test]
    fn solve_handles_pivoting() {
        let a = vec![vec![0.0, 1.0], vec![2.0, 0.0]];
        let x = solve(a, vec![3.0, 4.0]).unwrap();
        assert_eq!(x, vec![2.0, 3.0]);
    }
}
