//! Carbon stock estimation.
//!
//! Per pixel: NDVI → AGB (t/ha, linear per stratum, floored at zero)
//! → carbon (× carbon fraction) → CO2e (× 44/12 ≈ 3.67).
//! Per stratum totals are `Σ co2e_per_ha × pixel_area_ha`.

use serde::{Deserialize, Serialize};

use crate::classify::ForestClassifier;
use crate::config::{BiomassModel, CarbonConfig};
use crate::error::CanopyError;
use crate::events::{tracing_listener, AssessmentEvent, SharedListener};
use crate::geo::GeoReference;
use crate::grid::{Grid, PixelMask};
use crate::CanopyResult;

/// Symmetric proportional bounds on a CO2e total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyBounds {
    pub uncertainty_percent: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
    /// e.g. `"±15%"`.
    pub confidence_interval: String,
}

/// Aggregates for one occupied stratum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonBreakdownEntry {
    pub name: String,
    pub pixel_count: usize,
    pub area_ha: f64,
    pub mean_ndvi: f64,
    pub mean_agb_per_ha: f64,
    pub mean_carbon_per_ha: f64,
    pub mean_co2e_per_ha: f64,
    pub total_co2e: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonResult {
    /// Pixels inside the mask and valid in both grids.
    pub valid_pixels: usize,
    /// Area of every valid pixel, classified or not.
    pub total_area_ha: f64,
    pub total_co2e: f64,
    /// `floor(total_co2e)`; negative if the total is negative.
    pub credits_issued: i64,
    pub co2e_per_ha: f64,
    /// Occupied strata in priority order.
    pub breakdown: Vec<CarbonBreakdownEntry>,
    pub uncertainty: UncertaintyBounds,
}

impl CarbonResult {
    pub fn stratum(&self, name: &str) -> Option<&CarbonBreakdownEntry> {
        self.breakdown.iter().find(|e| e.name == name)
    }

    pub fn classified_pixels(&self) -> usize {
        self.breakdown.iter().map(|e| e.pixel_count).sum()
    }
}

/// Single-stratum estimate from a mean NDVI and an area.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeanCarbonEstimate {
    pub model: String,
    pub total_area_ha: f64,
    pub mean_ndvi: f64,
    pub agb_per_ha: f64,
    pub carbon_per_ha: f64,
    pub co2e_per_ha: f64,
    pub total_co2e: f64,
    pub credits_issued: i64,
    pub uncertainty: UncertaintyBounds,
}

pub struct CarbonModel {
    carbon_fraction: f64,
    co2_to_c_ratio: f64,
    uncertainty: f64,
    default_model: String,
    classifier: ForestClassifier,
    listener: SharedListener,
}

impl CarbonModel {
    pub fn new(config: &CarbonConfig) -> CanopyResult<Self> {
        if !(0.0..1.0).contains(&config.uncertainty) {
            return Err(CanopyError::Configuration(format!(
                "uncertainty must lie in [0, 1), got {}",
                config.uncertainty
            )));
        }
        Ok(Self {
            carbon_fraction: config.carbon_fraction,
            co2_to_c_ratio: config.co2_to_c_ratio,
            uncertainty: config.uncertainty,
            default_model: config.default_model.clone(),
            classifier: ForestClassifier::new(&config.biomass_models)?,
            listener: tracing_listener(),
        })
    }

    /// Route this model's events, and its classifier's, to `listener`.
    pub fn with_listener(mut self, listener: SharedListener) -> Self {
        self.classifier = self.classifier.with_listener(listener.clone());
        self.listener = listener;
        self
    }

    pub fn classifier(&self) -> &ForestClassifier {
        &self.classifier
    }

    /// Hectares covered by one pixel. Only defined for projected systems.
    pub fn pixel_area_hectares(georef: &GeoReference) -> CanopyResult<f64> {
        if !georef.crs.is_projected() {
            return Err(CanopyError::InvalidCrs(format!(
                "pixel area needs a projected CRS (e.g. UTM), got geographic {}",
                georef.crs
            )));
        }
        let t = &georef.transform;
        Ok(t.pixel_width() * t.pixel_height() / 10_000.0)
    }

    #[inline]
    pub fn ndvi_to_agb(ndvi: f64, model: &BiomassModel) -> f64 {
        (model.a * ndvi + model.b).max(0.0)
    }

    #[inline]
    pub fn agb_to_carbon(&self, agb: f64) -> f64 {
        agb * self.carbon_fraction
    }

    #[inline]
    pub fn carbon_to_co2e(&self, carbon: f64) -> f64 {
        carbon * self.co2_to_c_ratio
    }

    pub fn calculate_uncertainty(&self, total_co2e: f64) -> UncertaintyBounds {
        uncertainty_bounds(total_co2e, self.uncertainty)
    }

    /// Stratified estimate over the masked, co-valid pixel population.
    ///
    /// `mask = None` keeps every pixel.
    pub fn calculate_from_rasters(
        &self,
        ndvi: &Grid,
        ndwi: &Grid,
        mask: Option<&PixelMask>,
        georef: &GeoReference,
    ) -> CanopyResult<CarbonResult> {
        ndvi.ensure_same_shape(ndwi)?;
        if let Some(m) = mask {
            if !m.fits(ndvi) {
                return Err(CanopyError::ShapeMismatch {
                    expected: format!("{}x{} mask", ndvi.width, ndvi.height),
                    found: format!("{}x{} mask", m.width, m.height),
                });
            }
        }
        let pixel_area_ha = Self::pixel_area_hectares(georef)?;

        let (ndvi_valid, ndwi_valid): (Vec<f64>, Vec<f64>) = ndvi
            .data
            .iter()
            .zip(ndwi.data.iter())
            .enumerate()
            .filter(|(i, _)| mask.map_or(true, |m| m.data[*i]))
            .filter(|(_, (v, w))| !v.is_nan() && !w.is_nan())
            .map(|(_, (&v, &w))| (v, w))
            .unzip();

        if ndvi_valid.is_empty() {
            return Err(CanopyError::EmptyMask(
                "no pixel inside the area of interest is valid in both NDVI and NDWI".into(),
            ));
        }

        let forest_types = self.classifier.classify(&ndvi_valid, &ndwi_valid)?;

        let mut total_co2e = 0.0f64;
        let mut breakdown = Vec::new();
        for (label, model) in self.classifier.strata().iter() {
            let ndvi_type: Vec<f64> = forest_types
                .labels
                .iter()
                .zip(ndvi_valid.iter())
                .filter(|(l, _)| **l == Some(label))
                .map(|(_, &v)| v)
                .collect();
            if ndvi_type.is_empty() {
                continue;
            }

            let n = ndvi_type.len() as f64;
            let mut sum_ndvi = 0.0;
            let mut sum_agb = 0.0;
            let mut sum_carbon = 0.0;
            let mut sum_co2e = 0.0;
            for &v in &ndvi_type {
                let agb = Self::ndvi_to_agb(v, model);
                let carbon = self.agb_to_carbon(agb);
                sum_ndvi += v;
                sum_agb += agb;
                sum_carbon += carbon;
                sum_co2e += self.carbon_to_co2e(carbon);
            }

            let entry = CarbonBreakdownEntry {
                name: model.name.clone(),
                pixel_count: ndvi_type.len(),
                area_ha: n * pixel_area_ha,
                mean_ndvi: sum_ndvi / n,
                mean_agb_per_ha: sum_agb / n,
                mean_carbon_per_ha: sum_carbon / n,
                mean_co2e_per_ha: sum_co2e / n,
                total_co2e: sum_co2e * pixel_area_ha,
            };
            total_co2e += entry.total_co2e;
            self.listener.on_event(&AssessmentEvent::StratumAggregated {
                name: entry.name.clone(),
                pixel_count: entry.pixel_count,
                area_ha: entry.area_ha,
                total_co2e: entry.total_co2e,
            });
            breakdown.push(entry);
        }

        // Unclassified valid pixels still count towards the area.
        let total_area_ha = ndvi_valid.len() as f64 * pixel_area_ha;
        let result = CarbonResult {
            valid_pixels: ndvi_valid.len(),
            total_area_ha,
            total_co2e,
            credits_issued: total_co2e.floor() as i64,
            co2e_per_ha: if total_area_ha > 0.0 { total_co2e / total_area_ha } else { 0.0 },
            breakdown,
            uncertainty: self.calculate_uncertainty(total_co2e),
        };
        self.listener.on_event(&AssessmentEvent::CarbonTotals {
            valid_pixels: result.valid_pixels,
            total_area_ha: result.total_area_ha,
            total_co2e: result.total_co2e,
            credits_issued: result.credits_issued,
        });
        Ok(result)
    }

    /// Fallback for callers holding only a mean NDVI: one pass of the
    /// conversion chain with the configured default stratum.
    pub fn calculate_from_means(&self, mean_ndvi: f64, area_ha: f64) -> CanopyResult<MeanCarbonEstimate> {
        let model = self
            .classifier
            .strata()
            .find(&self.default_model)
            .ok_or_else(|| {
                CanopyError::Configuration(format!(
                    "default model '{}' has no configured coefficients",
                    self.default_model
                ))
            })?;

        let agb_per_ha = Self::ndvi_to_agb(mean_ndvi, model);
        let carbon_per_ha = self.agb_to_carbon(agb_per_ha);
        let co2e_per_ha = self.carbon_to_co2e(carbon_per_ha);
        let total_co2e = co2e_per_ha * area_ha;

        Ok(MeanCarbonEstimate {
            model: model.name.clone(),
            total_area_ha: area_ha,
            mean_ndvi,
            agb_per_ha,
            carbon_per_ha,
            co2e_per_ha,
            total_co2e,
            credits_issued: total_co2e.floor() as i64,
            uncertainty: self.calculate_uncertainty(total_co2e),
        })
    }
}

/// `[total·(1−u), total·(1+u)]`. The interval label truncates the percentage.
pub fn uncertainty_bounds(total_co2e: f64, uncertainty: f64) -> UncertaintyBounds {
    UncertaintyBounds {
        uncertainty_percent: uncertainty * 100.0,
        lower_bound: total_co2e * (1.0 - uncertainty),
        upper_bound: total_co2e * (1.0 + uncertainty),
        confidence_interval: format!("±{}%", (uncertainty * 100.0).trunc() as i64),
    }
}
