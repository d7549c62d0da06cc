//! Multi-date helpers: per-pixel compositing of an image stack, and temporal
//! stability of a mean-NDVI series (forest vs. cropland).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CanopyError;
use crate::events::{AssessmentEvent, EventListener};
use crate::grid::Grid;
use crate::stats::percentile_sorted;
use crate::CanopyResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompositeMethod {
    Median,
    Mean,
    Max,
    Min,
}

impl CompositeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompositeMethod::Median => "median",
            CompositeMethod::Mean => "mean",
            CompositeMethod::Max => "max",
            CompositeMethod::Min => "min",
        }
    }

    /// Reduce one pixel's stack. `values` must be non-empty and NaN-free.
    fn reduce(&self, values: &mut [f64]) -> f64 {
        match self {
            CompositeMethod::Median => {
                values.sort_by(f64::total_cmp);
                percentile_sorted(values, 50.0)
            }
            CompositeMethod::Mean => values.iter().sum::<f64>() / values.len() as f64,
            CompositeMethod::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            CompositeMethod::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }
}

impl FromStr for CompositeMethod {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "median" => Ok(CompositeMethod::Median),
            "mean" => Ok(CompositeMethod::Mean),
            "max" => Ok(CompositeMethod::Max),
            "min" => Ok(CompositeMethod::Min),
            _ => Err(CanopyError::UnknownMethod(format!(
                "compositing method '{s}' (expected median, mean, max or min)"
            ))),
        }
    }
}

/// NaN-aware per-pixel composite of equally-shaped grids.
///
/// A pixel that is NaN in every image stays NaN. A single grid is returned
/// unchanged.
pub fn temporal_composite(
    grids: &[Grid],
    method: CompositeMethod,
    listener: &dyn EventListener,
) -> CanopyResult<Grid> {
    let first = grids
        .first()
        .ok_or_else(|| CanopyError::invalid_input("grids", "empty image stack"))?;
    for g in &grids[1..] {
        first.ensure_same_shape(g)?;
    }
    if grids.len() == 1 {
        return Ok(first.clone());
    }

    let mut stack = Vec::with_capacity(grids.len());
    let data: Vec<f64> = (0..first.len())
        .map(|i| {
            stack.clear();
            stack.extend(grids.iter().map(|g| g.data[i]).filter(|v| !v.is_nan()));
            if stack.is_empty() {
                f64::NAN
            } else {
                method.reduce(&mut stack)
            }
        })
        .collect();

    let composite = Grid::from_vec(first.width, first.height, data)?;
    listener.on_event(&AssessmentEvent::CompositeCreated {
        method: method.as_str().to_string(),
        images: grids.len(),
        valid_pixels: composite.valid_count(),
    });
    Ok(composite)
}

/// Stability of a series of mean NDVI observations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalStability {
    pub stable: bool,
    /// `None` with fewer than two observations.
    pub cv: Option<f64>,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub n_observations: usize,
    pub message: String,
}

impl TemporalStability {
    /// Low coefficient of variation (≤ `max_cv`) reads as stable forest.
    pub fn assess(history: &[f64], max_cv: f64) -> Self {
        if history.len() < 2 {
            return Self {
                stable: true,
                cv: None,
                mean: None,
                std: None,
                n_observations: history.len(),
                message: "Insufficient temporal data for stability assessment".to_string(),
            };
        }

        let n = history.len() as f64;
        let mean = history.iter().sum::<f64>() / n;
        let std = (history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
        let cv = if mean != 0.0 { std / mean } else { f64::INFINITY };
        let stable = cv <= max_cv;

        Self {
            stable,
            cv: Some(cv),
            mean: Some(mean),
            std: Some(std),
            n_observations: history.len(),
            message: if stable {
                "Stable vegetation (likely forest)".to_string()
            } else {
                "High variability (likely cropland or seasonal vegetation)".to_string()
            },
        }
    }
}
