//! Data-quality gate: coverage of valid (non-NaN) pixels against a minimum.

use serde::{Deserialize, Serialize};

use crate::error::CanopyError;
use crate::events::{tracing_listener, AssessmentEvent, SharedListener};
use crate::grid::Grid;
use crate::CanopyResult;

/// Coverage record for one grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub label: String,
    pub total_pixels: usize,
    pub valid_pixels: usize,
    pub invalid_pixels: usize,
    pub coverage_percent: f64,
    pub passed: bool,
}

/// Coverage records for a batch of grids, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchQualityReport {
    pub reports: Vec<QualityReport>,
    /// AND of every individual `passed`.
    pub overall_passed: bool,
}

impl BatchQualityReport {
    pub fn get(&self, label: &str) -> Option<&QualityReport> {
        self.reports.iter().find(|r| r.label == label)
    }
}

pub struct QualityGate {
    min_coverage: f64,
    listener: SharedListener,
}

impl QualityGate {
    pub fn new(min_coverage: f64) -> Self {
        Self {
            min_coverage,
            listener: tracing_listener(),
        }
    }

    pub fn with_listener(mut self, listener: SharedListener) -> Self {
        self.listener = listener;
        self
    }

    pub fn min_coverage(&self) -> f64 {
        self.min_coverage
    }

    /// Assess one grid. A zero-pixel grid is `InvalidInput`.
    pub fn assess(&self, grid: &Grid, label: &str) -> CanopyResult<QualityReport> {
        assess_coverage(grid, label, self.min_coverage).map(|report| {
            self.listener.on_event(&AssessmentEvent::QualityAssessed {
                label: report.label.clone(),
                coverage_percent: report.coverage_percent,
                valid_pixels: report.valid_pixels,
                min_coverage: self.min_coverage,
                passed: report.passed,
            });
            report
        })
    }

    pub fn assess_multiple(&self, grids: &[(&Grid, &str)]) -> CanopyResult<BatchQualityReport> {
        let reports = grids
            .iter()
            .map(|(grid, label)| self.assess(grid, label))
            .collect::<CanopyResult<Vec<_>>>()?;
        let overall_passed = reports.iter().all(|r| r.passed);
        Ok(BatchQualityReport { reports, overall_passed })
    }
}

/// Pure coverage computation, no events.
pub fn assess_coverage(grid: &Grid, label: &str, min_coverage: f64) -> CanopyResult<QualityReport> {
    let total_pixels = grid.len();
    if total_pixels == 0 {
        return Err(CanopyError::invalid_input(
            label,
            "grid has zero pixels; coverage is undefined",
        ));
    }
    let valid_pixels = grid.valid_count();
    let coverage_percent = valid_pixels as f64 / total_pixels as f64 * 100.0;
    Ok(QualityReport {
        label: label.to_string(),
        total_pixels,
        valid_pixels,
        invalid_pixels: total_pixels - valid_pixels,
        coverage_percent,
        passed: coverage_percent >= min_coverage,
    })
}
