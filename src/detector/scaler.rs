use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Zero-mean, unit-variance scaling fitted on a training matrix.
/// Uses the population standard deviation; constant columns get scale 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(data: &Array2<f64>) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(AppError::validation("batch", "at least one row", "0 rows"));
        }
        let mean: Array1<f64> = data
            .mean_axis(Axis(0))
            .ok_or_else(|| AppError::validation("batch", "at least one row", "0 rows"))?;
        let std = data.std_axis(Axis(0), 0.0);
        let scale = std
            .iter()
            .map(|s| if *s > 0.0 && s.is_finite() { *s } else { 1.0 })
            .collect();

        Ok(Self {
            mean: mean.to_vec(),
            scale,
        })
    }

    pub fn transform(&self, data: &Array2<f64>) -> Result<Array2<f64>> {
        if data.ncols() != self.mean.len() {
            return Err(AppError::validation(
                "features",
                format!("{} columns", self.mean.len()),
                format!("{} columns", data.ncols()),
            ));
        }
        let mut out = data.clone();
        for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (m, s) = (self.mean[j], self.scale[j]);
            col.mapv_inplace(|v| (v - m) / s);
        }
        Ok(out)
    }
}
