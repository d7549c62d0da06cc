//! Eligibility adjudication.
//!
//! The engine accumulates named pass/fail criteria. Checks may run in any
//! order and may be repeated; a repeated check replaces its entry in place.
//! The final status is always derived from the current criteria, never stored.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::EligibilityConfig;
use crate::events::{tracing_listener, AssessmentEvent, SharedListener};

/// Fixed keys of the built-in checks.
pub mod keys {
    pub const DATA_QUALITY: &str = "data_quality";
    pub const HYDROLOGY: &str = "hydrology";
    pub const BIOMASS: &str = "biomass";
    pub const AREA: &str = "area";
    pub const STABILITY: &str = "stability";
    pub const ADDITIONALITY: &str = "additionality";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilityCriterion {
    pub name: String,
    pub passed: bool,
    pub value: f64,
    pub threshold: f64,
    pub message: String,
    /// Reserved for weighted scoring; not used by status derivation.
    pub weight: f64,
}

impl EligibilityCriterion {
    pub fn new(name: impl Into<String>, passed: bool, value: f64, threshold: f64, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            value,
            threshold,
            message: message.into(),
            weight: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EligibilityStatus {
    NoChecksPerformed,
    Eligible,
    /// Display names of the failed criteria, in insertion order.
    Ineligible { failed: Vec<String> },
}

impl EligibilityStatus {
    pub fn is_eligible(&self) -> bool {
        matches!(self, EligibilityStatus::Eligible)
    }
}

impl fmt::Display for EligibilityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EligibilityStatus::NoChecksPerformed => f.write_str("NO_CHECKS_PERFORMED"),
            EligibilityStatus::Eligible => f.write_str("ELIGIBLE"),
            EligibilityStatus::Ineligible { failed } => {
                write!(f, "INELIGIBLE (Failed: {})", failed.join(", "))
            }
        }
    }
}

/// One criterion in the serialisable summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionSummary {
    pub key: String,
    #[serde(flatten)]
    pub criterion: EligibilityCriterion,
}

/// Machine-readable eligibility record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EligibilitySummary {
    /// Display form, e.g. `INELIGIBLE (Failed: Minimum Area)`.
    pub status: String,
    pub eligible: bool,
    pub failed: Vec<String>,
    pub criteria: Vec<CriterionSummary>,
    pub passed_count: usize,
    pub total_count: usize,
}

/// Per-parcel accumulator. Not shared across parcels.
pub struct EligibilityEngine {
    thresholds: EligibilityConfig,
    criteria: Vec<(String, EligibilityCriterion)>,
    listener: SharedListener,
}

impl EligibilityEngine {
    pub fn new(thresholds: EligibilityConfig) -> Self {
        Self {
            thresholds,
            criteria: Vec::new(),
            listener: tracing_listener(),
        }
    }

    pub fn with_listener(mut self, listener: SharedListener) -> Self {
        self.listener = listener;
        self
    }

    /// Insert or replace the criterion under `key`. A replaced entry keeps its
    /// insertion position.
    pub fn record(&mut self, key: &str, criterion: EligibilityCriterion) {
        self.listener.on_event(&AssessmentEvent::CriterionEvaluated {
            key: key.to_string(),
            name: criterion.name.clone(),
            passed: criterion.passed,
            value: criterion.value,
            threshold: criterion.threshold,
        });
        match self.criteria.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = criterion,
            None => self.criteria.push((key.to_string(), criterion)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&EligibilityCriterion> {
        self.criteria.iter().find(|(k, _)| k == key).map(|(_, c)| c)
    }

    pub fn criteria(&self) -> impl Iterator<Item = (&str, &EligibilityCriterion)> {
        self.criteria.iter().map(|(k, c)| (k.as_str(), c))
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn check_data_quality(&mut self, coverage_percent: f64, min_coverage: Option<f64>) -> bool {
        let min = min_coverage.unwrap_or(self.thresholds.min_coverage_percent);
        let passed = coverage_percent >= min;
        let message = if passed {
            format!("Good data coverage ({coverage_percent:.1}%)")
        } else {
            format!("Insufficient coverage ({coverage_percent:.1}% < {min}%)")
        };
        self.record(
            keys::DATA_QUALITY,
            EligibilityCriterion::new("Data Quality", passed, coverage_percent, min, message),
        );
        passed
    }

    pub fn check_hydrological_condition(&mut self, ndwi_mean: f64, threshold: Option<f64>) -> bool {
        let threshold = threshold.unwrap_or(self.thresholds.ndwi_threshold);
        let passed = ndwi_mean >= threshold;
        let message = if passed {
            format!("Adequate water availability (NDWI: {ndwi_mean:.3})")
        } else {
            format!("Insufficient water (NDWI: {ndwi_mean:.3} < {threshold})")
        };
        self.record(
            keys::HYDROLOGY,
            EligibilityCriterion::new("Hydrological Condition", passed, ndwi_mean, threshold, message),
        );
        passed
    }

    pub fn check_minimum_biomass(&mut self, ndvi_mean: f64, min_ndvi: Option<f64>) -> bool {
        let min = min_ndvi.unwrap_or(self.thresholds.min_ndvi);
        let passed = ndvi_mean >= min;
        let message = if passed {
            format!("Sufficient vegetation (NDVI: {ndvi_mean:.3})")
        } else {
            format!("Insufficient vegetation (NDVI: {ndvi_mean:.3} < {min})")
        };
        self.record(
            keys::BIOMASS,
            EligibilityCriterion::new("Minimum Biomass", passed, ndvi_mean, min, message),
        );
        passed
    }

    pub fn check_minimum_area(&mut self, area_ha: f64, min_area: Option<f64>) -> bool {
        let min = min_area.unwrap_or(self.thresholds.min_area_ha);
        let passed = area_ha >= min;
        let message = if passed {
            format!("Area adequate ({area_ha:.2} ha)")
        } else {
            format!("Area too small ({area_ha:.2} ha < {min} ha)")
        };
        self.record(
            keys::AREA,
            EligibilityCriterion::new("Minimum Area", passed, area_ha, min, message),
        );
        passed
    }

    /// Coefficient of variation of a multi-date NDVI series.
    pub fn check_temporal_stability(&mut self, cv: f64, max_cv: Option<f64>) -> bool {
        let max = max_cv.unwrap_or(self.thresholds.max_temporal_cv);
        let passed = cv <= max;
        let message = if passed {
            format!("Stable vegetation (CV: {cv:.3})")
        } else {
            format!("High variability detected (CV: {cv:.3} > {max})")
        };
        self.record(
            keys::STABILITY,
            EligibilityCriterion::new("Temporal Stability", passed, cv, max, message),
        );
        passed
    }

    /// Vegetation-trend indicator from change detection.
    pub fn check_additionality(&mut self, percent_improved: f64, min_improvement: f64) -> bool {
        let passed = percent_improved >= min_improvement;
        let message = if passed {
            format!(
                "Vegetation improvement observed over {percent_improved:.1}% of area \
                 (indicator only, not formal additionality proof)"
            )
        } else {
            format!("Insufficient improvement ({percent_improved:.1}% < {min_improvement}%)")
        };
        self.record(
            keys::ADDITIONALITY,
            EligibilityCriterion::new("Vegetation Trend Indicator", passed, percent_improved, min_improvement, message),
        );
        passed
    }

    /// Derived from the current criteria; no state is updated.
    pub fn final_status(&self) -> EligibilityStatus {
        if self.criteria.is_empty() {
            return EligibilityStatus::NoChecksPerformed;
        }
        let failed: Vec<String> = self
            .criteria
            .iter()
            .filter(|(_, c)| !c.passed)
            .map(|(_, c)| c.name.clone())
            .collect();
        if failed.is_empty() {
            EligibilityStatus::Eligible
        } else {
            EligibilityStatus::Ineligible { failed }
        }
    }

    /// Derive the status and report it to the listener.
    pub fn announce_status(&self) -> EligibilityStatus {
        let status = self.final_status();
        self.listener.on_event(&AssessmentEvent::StatusDerived {
            status: status.to_string(),
        });
        status
    }

    pub fn passed_count(&self) -> usize {
        self.criteria.iter().filter(|(_, c)| c.passed).count()
    }

    pub fn generate_report(&self) -> String {
        let rule = "=".repeat(70);
        let mut lines = vec![
            String::new(),
            rule.clone(),
            "CARBON CREDIT ELIGIBILITY ASSESSMENT REPORT".to_string(),
            rule.clone(),
            String::new(),
        ];

        if self.criteria.is_empty() {
            lines.push("No eligibility checks have been performed.".to_string());
            lines.push(String::new());
            return lines.join("\n");
        }

        for (_, c) in &self.criteria {
            let mark = if c.passed { "✓ PASS" } else { "✗ FAIL" };
            lines.push(format!("{}: {}", c.name.to_uppercase(), mark));
            lines.push(format!("  {}", c.message));
            lines.push(format!("  Value: {:.4} | Threshold: {}", c.value, c.threshold));
            lines.push(String::new());
        }

        lines.push("-".repeat(70));
        lines.push(format!(
            "Summary: {}/{} criteria passed",
            self.passed_count(),
            self.criteria.len()
        ));
        lines.push(format!("FINAL STATUS: {}", self.final_status()));
        lines.push(rule);
        lines.push(String::new());
        lines.join("\n")
    }

    pub fn to_summary(&self) -> EligibilitySummary {
        let status = self.final_status();
        let failed = match &status {
            EligibilityStatus::Ineligible { failed } => failed.clone(),
            _ => Vec::new(),
        };
        EligibilitySummary {
            status: status.to_string(),
            eligible: status.is_eligible(),
            failed,
            criteria: self
                .criteria
                .iter()
                .map(|(k, c)| CriterionSummary {
                    key: k.clone(),
                    criterion: c.clone(),
                })
                .collect(),
            passed_count: self.passed_count(),
            total_count: self.criteria.len(),
        }
    }
}
