//! NDVI change against a historical baseline, used as additionality evidence.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::ChangeDetectionConfig;
use crate::error::CanopyError;
use crate::events::{tracing_listener, AssessmentEvent, SharedListener};
use crate::grid::Grid;
use crate::CanopyResult;

/// Length of the baseline acquisition window.
pub const BASELINE_WINDOW_DAYS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trend {
    SignificantImprovement,
    ModerateImprovement,
    Stable,
}

impl Trend {
    /// > 60 % improved → significant; > 40 % → moderate; otherwise stable.
    pub fn from_percent_improved(percent_improved: f64) -> Self {
        if percent_improved > 60.0 {
            Trend::SignificantImprovement
        } else if percent_improved > 40.0 {
            Trend::ModerateImprovement
        } else {
            Trend::Stable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::SignificantImprovement => "SIGNIFICANT_IMPROVEMENT",
            Trend::ModerateImprovement => "MODERATE_IMPROVEMENT",
            Trend::Stable => "STABLE",
        }
    }
}

impl std::fmt::Display for Trend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDetectionResult {
    pub mean_change: f64,
    pub pixels_improved: usize,
    pub pixels_degraded: usize,
    /// Of the co-valid population.
    pub percent_improved: f64,
    /// Of the co-valid population.
    pub percent_degraded: f64,
    /// Co-valid pixels as a share of the whole grid (data completeness).
    pub valid_pixel_percent: f64,
    pub trend: Trend,
}

/// Inclusive date range of the historical acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// `end = current − 30·months_back days`, `start = end − 60 days`.
///
/// A window reaching before the earliest representable date is `InvalidInput`.
pub fn baseline_period(current: NaiveDate, months_back: u32) -> CanopyResult<BaselineWindow> {
    let out_of_range = || {
        CanopyError::invalid_input(
            "months_back",
            format!("{months_back} months before {current} is outside the supported date range"),
        )
    };
    let end = current
        .checked_sub_days(Days::new(30 * u64::from(months_back)))
        .ok_or_else(out_of_range)?;
    let start = end
        .checked_sub_days(Days::new(BASELINE_WINDOW_DAYS))
        .ok_or_else(out_of_range)?;
    Ok(BaselineWindow { start, end })
}

pub struct ChangeDetector {
    change_threshold: f64,
    baseline_period_months: u32,
    listener: SharedListener,
}

impl ChangeDetector {
    pub fn new(change_threshold: f64) -> Self {
        Self {
            change_threshold,
            baseline_period_months: 12,
            listener: tracing_listener(),
        }
    }

    pub fn from_config(config: &ChangeDetectionConfig) -> Self {
        Self {
            baseline_period_months: config.baseline_period_months,
            ..Self::new(config.change_threshold)
        }
    }

    pub fn with_listener(mut self, listener: SharedListener) -> Self {
        self.listener = listener;
        self
    }

    pub fn change_threshold(&self) -> f64 {
        self.change_threshold
    }

    /// Baseline window for this detector's configured look-back.
    pub fn baseline_window(&self, current: NaiveDate) -> CanopyResult<BaselineWindow> {
        baseline_period(current, self.baseline_period_months)
    }

    pub fn calculate_ndvi_change(&self, current: &Grid, baseline: &Grid) -> CanopyResult<ChangeDetectionResult> {
        current.ensure_same_shape(baseline)?;

        let deltas: Vec<f64> = current
            .data
            .iter()
            .zip(baseline.data.iter())
            .filter(|(c, b)| !c.is_nan() && !b.is_nan())
            .map(|(c, b)| c - b)
            .collect();

        if deltas.is_empty() {
            return Err(CanopyError::InsufficientData(
                "no pixel is valid in both the current and the baseline NDVI".into(),
            ));
        }

        let valid = deltas.len() as f64;
        let t = self.change_threshold;
        let pixels_improved = deltas.iter().filter(|&&d| d > t).count();
        let pixels_degraded = deltas.iter().filter(|&&d| d < -t).count();
        let percent_improved = pixels_improved as f64 / valid * 100.0;

        let result = ChangeDetectionResult {
            mean_change: deltas.iter().sum::<f64>() / valid,
            pixels_improved,
            pixels_degraded,
            percent_improved,
            percent_degraded: pixels_degraded as f64 / valid * 100.0,
            valid_pixel_percent: valid / current.len() as f64 * 100.0,
            trend: Trend::from_percent_improved(percent_improved),
        };

        self.listener.on_event(&AssessmentEvent::ChangeDetected {
            trend: result.trend.to_string(),
            percent_improved: result.percent_improved,
            percent_degraded: result.percent_degraded,
        });
        Ok(result)
    }
}
