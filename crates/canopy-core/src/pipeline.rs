//! End-to-end assessment of one parcel.
//!
//! The pipeline sequences the components over grids supplied by the caller
//! (acquisition, reprojection and polygon rasterisation happen upstream) and
//! assembles a single [`AssessmentResults`] record.

use std::time::Instant;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::carbon::{CarbonModel, CarbonResult};
use crate::change::{BaselineWindow, ChangeDetectionResult, ChangeDetector};
use crate::config::{EngineConfig, ProjectConfig};
use crate::eligibility::{EligibilityEngine, EligibilitySummary};
use crate::error::CanopyError;
use crate::events::{tracing_listener, AssessmentEvent, SharedListener};
use crate::geo::GeoReference;
use crate::grid::{Grid, PixelMask};
use crate::quality::{BatchQualityReport, QualityGate};
use crate::stats::IndexStatistics;
use crate::temporal::TemporalStability;
use crate::CanopyResult;

const NDVI_LABEL: &str = "NDVI";
const NDWI_LABEL: &str = "NDWI";

/// Everything one run needs. Grids share one georeference.
#[derive(Debug, Clone)]
pub struct AssessmentInputs {
    pub ndvi: Grid,
    pub ndwi: Grid,
    /// Historical NDVI for change detection.
    pub baseline_ndvi: Option<Grid>,
    /// Rasterised area of interest. `None` keeps every pixel.
    pub mask: Option<PixelMask>,
    pub georef: GeoReference,
    /// Series of mean NDVI values for the stability check.
    pub ndvi_history: Option<Vec<f64>>,
    /// Date of the current acquisition, used to report the baseline window.
    pub acquired: Option<NaiveDate>,
}

impl AssessmentInputs {
    pub fn new(ndvi: Grid, ndwi: Grid, georef: GeoReference) -> Self {
        Self {
            ndvi,
            ndwi,
            baseline_ndvi: None,
            mask: None,
            georef,
            ndvi_history: None,
            acquired: None,
        }
    }

    pub fn with_baseline(mut self, baseline: Grid) -> Self {
        self.baseline_ndvi = Some(baseline);
        self
    }

    pub fn with_mask(mut self, mask: PixelMask) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_history(mut self, history: Vec<f64>) -> Self {
        self.ndvi_history = Some(history);
        self
    }

    pub fn acquired_on(mut self, date: NaiveDate) -> Self {
        self.acquired = Some(date);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentResults {
    pub project: ProjectConfig,
    pub crs: String,
    pub quality: BatchQualityReport,
    pub change_detection: Option<ChangeDetectionResult>,
    pub baseline_window: Option<BaselineWindow>,
    pub ndvi_stats: IndexStatistics,
    pub ndwi_stats: IndexStatistics,
    pub carbon: CarbonResult,
    pub temporal_stability: Option<TemporalStability>,
    pub eligibility: EligibilitySummary,
    /// Text form of the eligibility block.
    pub eligibility_report: String,
    pub elapsed_ms: u64,
}

pub struct AssessmentPipeline {
    config: EngineConfig,
    warnings: Vec<String>,
    listener: SharedListener,
}

impl AssessmentPipeline {
    /// Validates `config`; legal-but-suspicious settings are reported as
    /// warnings at the start of each run.
    pub fn new(config: EngineConfig) -> CanopyResult<Self> {
        let warnings = config.validate()?;
        Ok(Self {
            config,
            warnings,
            listener: tracing_listener(),
        })
    }

    pub fn with_listener(mut self, listener: SharedListener) -> Self {
        self.listener = listener;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn step(&self, step: usize, total: usize, name: &str) {
        self.listener.on_event(&AssessmentEvent::PipelineStep {
            step,
            total,
            name: name.to_string(),
        });
    }

    pub fn run(&self, inputs: &AssessmentInputs) -> CanopyResult<AssessmentResults> {
        let started = Instant::now();
        for message in &self.warnings {
            self.listener.on_event(&AssessmentEvent::ConfigWarning {
                message: message.clone(),
            });
        }

        inputs.ndvi.ensure_same_shape(&inputs.ndwi)?;
        let cd = &self.config.change_detection;
        let baseline = inputs.baseline_ndvi.as_ref().filter(|_| cd.enable);
        let total = if baseline.is_some() { 5 } else { 4 };
        let mut n = 0;

        // Change detection
        let mut change_detection = None;
        let mut baseline_window = None;
        if let Some(baseline) = baseline {
            n += 1;
            self.step(n, total, "Analyzing historical baseline");
            let detector = ChangeDetector::from_config(cd).with_listener(self.listener.clone());
            baseline_window = inputs
                .acquired
                .map(|d| detector.baseline_window(d))
                .transpose()?;
            let change = detector.calculate_ndvi_change(&inputs.ndvi, baseline)?;
            if change.percent_improved < cd.min_improvement_percent {
                self.listener.on_event(&AssessmentEvent::LowImprovement {
                    percent_improved: change.percent_improved,
                    min_improvement_percent: cd.min_improvement_percent,
                });
            }
            change_detection = Some(change);
        }

        // Data quality
        n += 1;
        self.step(n, total, "Assessing data quality");
        let gate = QualityGate::new(self.config.quality.min_coverage_percent)
            .with_listener(self.listener.clone());
        let quality = gate.assess_multiple(&[(&inputs.ndvi, NDVI_LABEL), (&inputs.ndwi, NDWI_LABEL)])?;
        if !quality.overall_passed {
            let failed: Vec<String> = quality
                .reports
                .iter()
                .filter(|r| !r.passed)
                .map(|r| format!("{} coverage {:.1}%", r.label, r.coverage_percent))
                .collect();
            return Err(CanopyError::QualityGateFailed(format!(
                "{} (minimum {}%)",
                failed.join(", "),
                gate.min_coverage()
            )));
        }

        // Zonal statistics
        n += 1;
        self.step(n, total, "Calculating zonal statistics");
        let ndvi_stats = zonal_statistics(&inputs.ndvi, inputs.mask.as_ref())?;
        let ndwi_stats = zonal_statistics(&inputs.ndwi, inputs.mask.as_ref())?;

        // Carbon
        n += 1;
        self.step(n, total, "Calculating carbon credits");
        let model = CarbonModel::new(&self.config.carbon_model)?.with_listener(self.listener.clone());
        let carbon = model.calculate_from_rasters(
            &inputs.ndvi,
            &inputs.ndwi,
            inputs.mask.as_ref(),
            &inputs.georef,
        )?;

        // Eligibility
        n += 1;
        self.step(n, total, "Checking eligibility");
        let mut engine = EligibilityEngine::new(self.config.eligibility.clone())
            .with_listener(self.listener.clone());
        let ndvi_coverage = quality
            .get(NDVI_LABEL)
            .map(|r| r.coverage_percent)
            .ok_or_else(|| CanopyError::InsufficientData("no NDVI quality record".into()))?;
        engine.check_data_quality(ndvi_coverage, None);
        engine.check_hydrological_condition(ndwi_stats.mean, None);
        engine.check_minimum_biomass(ndvi_stats.mean, None);
        engine.check_minimum_area(carbon.total_area_ha, None);

        let temporal_stability = inputs.ndvi_history.as_deref().map(|history| {
            TemporalStability::assess(history, self.config.eligibility.max_temporal_cv)
        });
        if let Some(cv) = temporal_stability.as_ref().and_then(|s| s.cv) {
            engine.check_temporal_stability(cv, None);
        }
        if let Some(change) = &change_detection {
            engine.check_additionality(change.percent_improved, cd.min_improvement_percent);
        }
        engine.announce_status();

        Ok(AssessmentResults {
            project: self.config.project.clone(),
            crs: inputs.georef.crs.to_string(),
            quality,
            change_detection,
            baseline_window,
            ndvi_stats,
            ndwi_stats,
            carbon,
            temporal_stability,
            eligibility: engine.to_summary(),
            eligibility_report: engine.generate_report(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Statistics over the pixels inside `mask`.
fn zonal_statistics(grid: &Grid, mask: Option<&PixelMask>) -> CanopyResult<IndexStatistics> {
    match mask {
        None => IndexStatistics::compute(grid),
        Some(m) => {
            if !m.fits(grid) {
                return Err(CanopyError::ShapeMismatch {
                    expected: format!("{}x{} mask", grid.width, grid.height),
                    found: format!("{}x{} mask", m.width, m.height),
                });
            }
            let inside = grid
                .data
                .iter()
                .zip(m.data.iter())
                .filter(|(_, keep)| **keep)
                .map(|(&v, _)| v)
                .collect();
            IndexStatistics::from_values(inside)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BiomassModel;
    use crate::eligibility::keys;
    use crate::events::{FnListener, NullListener};
    use crate::geo::{AffineTransform, Crs};
    use approx::assert_relative_eq;
    use std::sync::{Arc, Mutex};

    fn utm_10m() -> GeoReference {
        GeoReference::new(
            Crs::from_epsg(32737).unwrap(),
            AffineTransform::north_up(300_000.0, 9_900_000.0, 10.0, 10.0),
        )
    }

    fn recorder() -> (SharedListener, Arc<Mutex<Vec<AssessmentEvent>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: SharedListener = Arc::new(FnListener::new("recorder", move |e: &AssessmentEvent| {
            sink.lock().unwrap().push(e.clone());
        }));
        (listener, seen)
    }

    /// 40x40 dense forest: 1600 pixels × 0.01 ha = 16 ha.
    fn forest_inputs() -> AssessmentInputs {
        AssessmentInputs::new(Grid::filled(40, 40, 0.7), Grid::filled(40, 40, 0.0), utm_10m())
    }

    #[test]
    fn healthy_parcel_is_eligible() {
        let (listener, seen) = recorder();
        let pipeline = AssessmentPipeline::new(EngineConfig::default())
            .unwrap()
            .with_listener(listener);
        let r = pipeline.run(&forest_inputs()).unwrap();

        assert!(r.quality.overall_passed);
        assert_relative_eq!(r.ndvi_stats.mean, 0.7, epsilon = 1e-12);
        assert_relative_eq!(r.carbon.total_area_ha, 16.0, epsilon = 1e-9);
        assert_eq!(r.carbon.stratum("dense_forest").unwrap().pixel_count, 1600);
        assert_eq!(r.eligibility.status, "ELIGIBLE");
        assert_eq!(r.eligibility.total_count, 4);
        assert!(r.change_detection.is_none());
        assert_eq!(r.crs, "EPSG:32737");

        let events = seen.lock().unwrap();
        let steps: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                AssessmentEvent::PipelineStep { step, total, .. } => Some((*step, *total)),
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
        assert!(matches!(
            events.last(),
            Some(AssessmentEvent::StatusDerived { status }) if status == "ELIGIBLE"
        ));
    }

    #[test]
    fn low_coverage_stops_before_carbon() {
        let (listener, seen) = recorder();
        let mut inputs = forest_inputs();
        for c in 0..40 {
            for r in 0..10 {
                inputs.ndvi.set(r, c, f64::NAN);
            }
        }
        let err = AssessmentPipeline::new(EngineConfig::default())
            .unwrap()
            .with_listener(listener)
            .run(&inputs)
            .unwrap_err();
        assert!(matches!(err, CanopyError::QualityGateFailed(ref m) if m.contains("NDVI")));
        let events = seen.lock().unwrap();
        assert!(!events.iter().any(|e| matches!(e, AssessmentEvent::CarbonTotals { .. })));
    }

    #[test]
    fn data_quality_criterion_uses_ndvi_coverage() {
        let mut inputs = forest_inputs();
        for c in 0..40 {
            for r in 0..6 {
                inputs.ndwi.set(r, c, f64::NAN);
            }
        }
        let r = AssessmentPipeline::new(EngineConfig::default())
            .unwrap()
            .with_listener(Arc::new(NullListener))
            .run(&inputs)
            .unwrap();
        assert_eq!(r.quality.get(NDWI_LABEL).unwrap().coverage_percent, 85.0);
        let dq = r
            .eligibility
            .criteria
            .iter()
            .find(|c| c.key == keys::DATA_QUALITY)
            .unwrap();
        assert_eq!(dq.criterion.value, 100.0);
        assert!(dq.criterion.passed);
    }

    #[test]
    fn change_detection_adds_additionality() {
        let (listener, seen) = recorder();
        let inputs = forest_inputs()
            .with_baseline(Grid::filled(40, 40, 0.65))
            .acquired_on(NaiveDate::from_ymd_opt(2024, 6, 30).unwrap());
        let r = AssessmentPipeline::new(EngineConfig::default())
            .unwrap()
            .with_listener(listener)
            .run(&inputs)
            .unwrap();

        let change = r.change_detection.as_ref().unwrap();
        assert_eq!(change.percent_improved, 0.0);
        assert!(r.baseline_window.is_some());
        assert_eq!(
            r.eligibility.status,
            "INELIGIBLE (Failed: Vegetation Trend Indicator)"
        );
        assert_eq!(r.eligibility.criteria.last().unwrap().key, keys::ADDITIONALITY);

        let events = seen.lock().unwrap();
        assert!(events.iter().any(|e| matches!(e, AssessmentEvent::LowImprovement { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, AssessmentEvent::PipelineStep { step: 1, total: 5, .. })));
    }

    #[test]
    fn disabled_change_detection_ignores_baseline() {
        let mut config = EngineConfig::default();
        config.change_detection.enable = false;
        let inputs = forest_inputs().with_baseline(Grid::filled(40, 40, 0.2));
        let r = AssessmentPipeline::new(config)
            .unwrap()
            .with_listener(Arc::new(NullListener))
            .run(&inputs)
            .unwrap();
        assert!(r.change_detection.is_none());
        assert!(r.eligibility.criteria.iter().all(|c| c.key != keys::ADDITIONALITY));
    }

    #[test]
    fn small_parcel_fails_area() {
        let inputs = AssessmentInputs::new(Grid::filled(5, 5, 0.7), Grid::filled(5, 5, 0.0), utm_10m());
        let r = AssessmentPipeline::new(EngineConfig::default())
            .unwrap()
            .with_listener(Arc::new(NullListener))
            .run(&inputs)
            .unwrap();
        assert_relative_eq!(r.carbon.total_area_ha, 0.25, epsilon = 1e-12);
        assert_eq!(r.eligibility.status, "INELIGIBLE (Failed: Minimum Area)");
    }

    #[test]
    fn mask_restricts_statistics_and_carbon() {
        let mut ndvi = Grid::filled(40, 40, 0.7);
        for c in 20..40 {
            for r in 0..40 {
                ndvi.set(r, c, 0.3);
            }
        }
        let mask_data: Vec<bool> = (0..1600).map(|i| i % 40 < 20).collect();
        let inputs = AssessmentInputs::new(ndvi, Grid::filled(40, 40, 0.0), utm_10m())
            .with_mask(PixelMask::from_vec(40, 40, mask_data).unwrap());
        let r = AssessmentPipeline::new(EngineConfig::default())
            .unwrap()
            .with_listener(Arc::new(NullListener))
            .run(&inputs)
            .unwrap();
        assert_eq!(r.ndvi_stats.count, 800);
        assert_relative_eq!(r.ndvi_stats.mean, 0.7, epsilon = 1e-12);
        assert_eq!(r.carbon.valid_pixels, 800);
        assert!(r.carbon.stratum("sparse_vegetation").is_none());
    }

    #[test]
    fn unstable_history_fails_stability() {
        let inputs = forest_inputs().with_history(vec![0.8, 0.1, 0.7, 0.1]);
        let r = AssessmentPipeline::new(EngineConfig::default())
            .unwrap()
            .with_listener(Arc::new(NullListener))
            .run(&inputs)
            .unwrap();
        assert!(!r.temporal_stability.as_ref().unwrap().stable);
        assert_eq!(r.eligibility.status, "INELIGIBLE (Failed: Temporal Stability)");
    }

    #[test]
    fn duplicate_priorities_surface_as_warnings() {
        let (listener, seen) = recorder();
        let mut config = EngineConfig::default();
        config.carbon_model.biomass_models = vec![
            BiomassModel::new("moderate_forest", 120.3, -35.4, 0.4, 1.0, 1),
            BiomassModel::new("other", 60.0, -10.0, 0.2, 0.4, 1),
        ];
        AssessmentPipeline::new(config)
            .unwrap()
            .with_listener(listener)
            .run(&forest_inputs())
            .unwrap();
        let events = seen.lock().unwrap();
        assert!(matches!(events.first(), Some(AssessmentEvent::ConfigWarning { .. })));
    }

    #[test]
    fn geographic_georeference_is_rejected() {
        let mut inputs = forest_inputs();
        inputs.georef = GeoReference::new(Crs::wgs84(), AffineTransform::north_up(36.0, -1.0, 0.0001, 0.0001));
        let err = AssessmentPipeline::new(EngineConfig::default())
            .unwrap()
            .with_listener(Arc::new(NullListener))
            .run(&inputs)
            .unwrap_err();
        assert!(matches!(err, CanopyError::InvalidCrs(_)));
    }

    #[test]
    fn results_serialize_to_json() {
        let r = AssessmentPipeline::new(EngineConfig::default())
            .unwrap()
            .with_listener(Arc::new(NullListener))
            .run(&forest_inputs())
            .unwrap();
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["eligibility"]["status"], "ELIGIBLE");
        assert_eq!(v["carbon"]["breakdown"][0]["name"], "dense_forest");
    }
}
