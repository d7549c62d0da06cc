//! Assessment event sink.
//!
//! Components never log through global state; each holds an
//! `Arc<dyn EventListener>` and emits typed [`AssessmentEvent`]s to it.
//! [`TracingListener`] is the default and forwards to `tracing`.

use std::sync::Arc;

use serde::Serialize;

/// Structured events emitted by the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AssessmentEvent {
    QualityAssessed {
        label: String,
        coverage_percent: f64,
        valid_pixels: usize,
        min_coverage: f64,
        passed: bool,
    },
    PixelsClassified {
        total_pixels: usize,
        classified_pixels: usize,
        unclassified_pixels: usize,
    },
    StratumAggregated {
        name: String,
        pixel_count: usize,
        area_ha: f64,
        total_co2e: f64,
    },
    CarbonTotals {
        valid_pixels: usize,
        total_area_ha: f64,
        total_co2e: f64,
        credits_issued: i64,
    },
    ChangeDetected {
        trend: String,
        percent_improved: f64,
        percent_degraded: f64,
    },
    LowImprovement {
        percent_improved: f64,
        min_improvement_percent: f64,
    },
    CompositeCreated {
        method: String,
        images: usize,
        valid_pixels: usize,
    },
    CriterionEvaluated {
        key: String,
        name: String,
        passed: bool,
        value: f64,
        threshold: f64,
    },
    StatusDerived {
        status: String,
    },
    ConfigWarning {
        message: String,
    },
    PipelineStep {
        step: usize,
        total: usize,
        name: String,
    },
}

impl AssessmentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::QualityAssessed { .. } => "QualityAssessed",
            Self::PixelsClassified { .. } => "PixelsClassified",
            Self::StratumAggregated { .. } => "StratumAggregated",
            Self::CarbonTotals { .. } => "CarbonTotals",
            Self::ChangeDetected { .. } => "ChangeDetected",
            Self::LowImprovement { .. } => "LowImprovement",
            Self::CompositeCreated { .. } => "CompositeCreated",
            Self::CriterionEvaluated { .. } => "CriterionEvaluated",
            Self::StatusDerived { .. } => "StatusDerived",
            Self::ConfigWarning { .. } => "ConfigWarning",
            Self::PipelineStep { .. } => "PipelineStep",
        }
    }
}

pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &AssessmentEvent);

    fn name(&self) -> &str {
        "anonymous"
    }
}

/// Shared handle every component stores.
pub type SharedListener = Arc<dyn EventListener>;

/// Closure-backed listener.
pub struct FnListener<F>
where
    F: Fn(&AssessmentEvent) + Send + Sync,
{
    name: String,
    handler: F,
}

impl<F> FnListener<F>
where
    F: Fn(&AssessmentEvent) + Send + Sync,
{
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

impl<F> EventListener for FnListener<F>
where
    F: Fn(&AssessmentEvent) + Send + Sync,
{
    fn on_event(&self, event: &AssessmentEvent) {
        (self.handler)(event);
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl EventListener for NullListener {
    fn on_event(&self, _event: &AssessmentEvent) {}

    fn name(&self) -> &str {
        "null"
    }
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl EventListener for TracingListener {
    fn on_event(&self, event: &AssessmentEvent) {
        use tracing::{debug, info, warn};

        match event {
            AssessmentEvent::QualityAssessed {
                label,
                coverage_percent,
                valid_pixels,
                min_coverage,
                passed,
            } => {
                if *passed {
                    info!(%label, coverage = %format!("{coverage_percent:.1}%"), valid_pixels, "quality PASSED");
                } else {
                    warn!(%label, coverage = %format!("{coverage_percent:.1}%"), valid_pixels, min_coverage, "quality FAILED");
                }
            }
            AssessmentEvent::PixelsClassified {
                total_pixels,
                classified_pixels,
                unclassified_pixels,
            } => debug!(total_pixels, classified_pixels, unclassified_pixels, "pixels classified"),
            AssessmentEvent::StratumAggregated {
                name,
                pixel_count,
                area_ha,
                total_co2e,
            } => info!(stratum = %name, pixel_count, area_ha = %format!("{area_ha:.2}"), total_co2e = %format!("{total_co2e:.2}"), "stratum aggregated"),
            AssessmentEvent::CarbonTotals {
                valid_pixels,
                total_area_ha,
                total_co2e,
                credits_issued,
            } => info!(valid_pixels, total_area_ha = %format!("{total_area_ha:.2}"), total_co2e = %format!("{total_co2e:.2}"), credits_issued, "carbon totals"),
            AssessmentEvent::ChangeDetected {
                trend,
                percent_improved,
                percent_degraded,
            } => info!(%trend, improved = %format!("{percent_improved:.1}%"), degraded = %format!("{percent_degraded:.1}%"), "change detected"),
            AssessmentEvent::LowImprovement {
                percent_improved,
                min_improvement_percent,
            } => warn!(improved = %format!("{percent_improved:.1}%"), min_improvement_percent, "low improvement, additionality may fail"),
            AssessmentEvent::CompositeCreated {
                method,
                images,
                valid_pixels,
            } => info!(%method, images, valid_pixels, "temporal composite created"),
            AssessmentEvent::CriterionEvaluated {
                key, passed, value, threshold, ..
            } => {
                if *passed {
                    info!(criterion = %key, value, threshold, "check PASSED");
                } else {
                    warn!(criterion = %key, value, threshold, "check FAILED");
                }
            }
            AssessmentEvent::StatusDerived { status } => info!(%status, "final eligibility status"),
            AssessmentEvent::ConfigWarning { message } => warn!("{message}"),
            AssessmentEvent::PipelineStep { step, total, name } => info!("[STEP {step}/{total}] {name}"),
        }
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Default listener handle.
pub fn tracing_listener() -> SharedListener {
    Arc::new(TracingListener)
}
