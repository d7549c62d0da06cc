//! Zonal statistics over the valid pixels of a grid.

use serde::{Deserialize, Serialize};

use crate::error::CanopyError;
use crate::grid::Grid;
use crate::CanopyResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatistics {
    pub count: usize,
    pub mean: f64,
    /// Population standard deviation.
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub q25: f64,
    pub q75: f64,
}

impl IndexStatistics {
    /// Statistics of the non-NaN values. Zero valid pixels → `InsufficientData`.
    pub fn compute(grid: &Grid) -> CanopyResult<Self> {
        Self::from_values(grid.valid_values().collect())
    }

    pub fn from_values(mut values: Vec<f64>) -> CanopyResult<Self> {
        values.retain(|v| !v.is_nan());
        if values.is_empty() {
            return Err(CanopyError::InsufficientData(
                "no valid pixels for statistics".into(),
            ));
        }
        values.sort_by(f64::total_cmp);

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Ok(Self {
            count: values.len(),
            mean,
            std: variance.sqrt(),
            min: values[0],
            max: values[values.len() - 1],
            median: percentile_sorted(&values, 50.0),
            q25: percentile_sorted(&values, 25.0),
            q75: percentile_sorted(&values, 75.0),
        })
    }

    /// Coefficient of variation (`std / mean`); infinite when the mean is zero.
    pub fn cv(&self) -> f64 {
        if self.mean == 0.0 {
            f64::INFINITY
        } else {
            self.std / self.mean
        }
    }
}

/// Linear-interpolated percentile of an ascending, non-empty slice.
/// `p` in `[0, 100]`.
pub(crate) fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    debug_assert!(!sorted.is_empty());
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
