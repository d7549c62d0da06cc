//! Engine configuration.
//!
//! Loaded from YAML. Every section has serde defaults so a partial file is
//! valid; string values of the form `${VAR}` are substituted from the process
//! environment before deserialisation.

use std::collections::HashSet;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CanopyError;
use crate::CanopyResult;

/// Longest accepted change-detection look-back (100 years).
pub const MAX_BASELINE_PERIOD_MONTHS: u32 = 1200;

/// Accepts a scalar of the field's own type or its text form, so values
/// substituted from `${VAR}` (always strings) still load into numeric fields.
fn scalar_or_text<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de> + FromStr,
    T::Err: std::fmt::Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar<T> {
        Typed(T),
        Text(String),
    }

    match Scalar::<T>::deserialize(d)? {
        Scalar::Typed(v) => Ok(v),
        Scalar::Text(text) => text.trim().parse().map_err(|e| {
            serde::de::Error::custom(format!("cannot read '{text}' as a number or flag: {e}"))
        }),
    }
}

// ── Strata ────────────────────────────────────────────────────────────────────

/// NDWI gating rule for a stratum: the pixel's NDWI must be strictly above `min`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NdwiGate {
    #[serde(deserialize_with = "scalar_or_text")]
    pub min: f64,
}

impl NdwiGate {
    #[inline]
    pub fn admits(&self, ndwi: f64) -> bool {
        ndwi > self.min
    }
}

/// Per-stratum linear NDVI → AGB model and its selection rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BiomassModel {
    pub name: String,
    /// Slope of AGB (t/ha) against NDVI.
    #[serde(deserialize_with = "scalar_or_text")]
    pub a: f64,
    /// Intercept (t/ha).
    #[serde(deserialize_with = "scalar_or_text")]
    pub b: f64,
    /// Inclusive lower NDVI bound.
    #[serde(default = "default_ndvi_min", deserialize_with = "scalar_or_text")]
    pub ndvi_min: f64,
    /// Exclusive upper NDVI bound.
    #[serde(default = "default_ndvi_max", deserialize_with = "scalar_or_text")]
    pub ndvi_max: f64,
    /// Higher values are evaluated first.
    #[serde(default, deserialize_with = "scalar_or_text")]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ndwi_gate: Option<NdwiGate>,
}

fn default_ndvi_min() -> f64 {
    -1.0
}

fn default_ndvi_max() -> f64 {
    1.0
}

impl BiomassModel {
    pub fn new(name: impl Into<String>, a: f64, b: f64, ndvi_min: f64, ndvi_max: f64, priority: i32) -> Self {
        Self {
            name: name.into(),
            a,
            b,
            ndvi_min,
            ndvi_max,
            priority,
            ndwi_gate: None,
        }
    }

    pub fn with_ndwi_gate(mut self, min: f64) -> Self {
        self.ndwi_gate = Some(NdwiGate { min });
        self
    }

    /// Half-open `[ndvi_min, ndvi_max)` membership plus the optional NDWI gate.
    #[inline]
    pub fn selects(&self, ndvi: f64, ndwi: f64) -> bool {
        ndvi >= self.ndvi_min
            && ndvi < self.ndvi_max
            && self.ndwi_gate.map_or(true, |g| g.admits(ndwi))
    }
}

/// The three strata shipped as defaults.
pub fn default_biomass_models() -> Vec<BiomassModel> {
    vec![
        BiomassModel::new("dense_forest", 180.5, -60.2, 0.6, 1.0, 3).with_ndwi_gate(-0.2),
        BiomassModel::new("moderate_forest", 120.3, -35.4, 0.4, 0.6, 2).with_ndwi_gate(-0.3),
        BiomassModel::new("sparse_vegetation", 60.0, -10.0, 0.2, 0.4, 1),
    ]
}

// ── Sections ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub aoi: String,
    /// Acquisition windows as `(start, end)` date strings.
    pub time_intervals: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    #[serde(deserialize_with = "scalar_or_text")]
    pub min_coverage_percent: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self { min_coverage_percent: 80.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarbonConfig {
    /// Carbon mass fraction of dry biomass.
    #[serde(deserialize_with = "scalar_or_text")]
    pub carbon_fraction: f64,
    /// CO2 / C molecular-weight ratio.
    #[serde(deserialize_with = "scalar_or_text")]
    pub co2_to_c_ratio: f64,
    /// Fractional uncertainty `u` in `[0, 1)`.
    #[serde(deserialize_with = "scalar_or_text")]
    pub uncertainty: f64,
    /// Stratum used by the mean-NDVI fallback.
    pub default_model: String,
    pub biomass_models: Vec<BiomassModel>,
}

impl Default for CarbonConfig {
    fn default() -> Self {
        Self {
            carbon_fraction: 0.48,
            co2_to_c_ratio: 3.67,
            uncertainty: 0.15,
            default_model: "moderate_forest".to_string(),
            biomass_models: default_biomass_models(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EligibilityConfig {
    #[serde(deserialize_with = "scalar_or_text")]
    pub min_coverage_percent: f64,
    #[serde(deserialize_with = "scalar_or_text")]
    pub ndwi_threshold: f64,
    #[serde(deserialize_with = "scalar_or_text")]
    pub min_ndvi: f64,
    #[serde(deserialize_with = "scalar_or_text")]
    pub min_area_ha: f64,
    #[serde(deserialize_with = "scalar_or_text")]
    pub max_temporal_cv: f64,
}

impl Default for EligibilityConfig {
    fn default() -> Self {
        Self {
            min_coverage_percent: 80.0,
            ndwi_threshold: -0.4,
            min_ndvi: 0.3,
            min_area_ha: 1.0,
            max_temporal_cv: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeDetectionConfig {
    #[serde(deserialize_with = "scalar_or_text")]
    pub enable: bool,
    #[serde(deserialize_with = "scalar_or_text")]
    pub change_threshold: f64,
    #[serde(deserialize_with = "scalar_or_text")]
    pub baseline_period_months: u32,
    #[serde(deserialize_with = "scalar_or_text")]
    pub min_improvement_percent: f64,
}

impl Default for ChangeDetectionConfig {
    fn default() -> Self {
        Self {
            enable: true,
            change_threshold: 0.1,
            baseline_period_months: 12,
            min_improvement_percent: 30.0,
        }
    }
}

/// Full engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub project: ProjectConfig,
    pub quality: QualityConfig,
    pub carbon_model: CarbonConfig,
    pub eligibility: EligibilityConfig,
    pub change_detection: ChangeDetectionConfig,
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl EngineConfig {
    /// Parse YAML, substitute `${VAR}` placeholders from the environment, and
    /// validate.
    pub fn from_yaml_str(yaml: &str) -> CanopyResult<Self> {
        Self::from_yaml_with(yaml, |name| std::env::var(name).ok())
    }

    /// Like [`EngineConfig::from_yaml_str`] with an explicit variable lookup.
    pub fn from_yaml_with<F>(yaml: &str, lookup: F) -> CanopyResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut value: serde_yaml::Value = serde_yaml::from_str(yaml)
            .map_err(|e| CanopyError::Configuration(format!("malformed YAML: {e}")))?;
        if value.is_null() {
            value = serde_yaml::Value::Mapping(Default::default());
        }
        resolve_env_placeholders(&mut value, &lookup)?;
        let config: EngineConfig = serde_yaml::from_value(value)
            .map_err(|e| CanopyError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> CanopyResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// Returns warnings for legal-but-suspicious settings (duplicate
    /// priorities leave tie-breaking to list order).
    pub fn validate(&self) -> CanopyResult<Vec<String>> {
        let mut warnings = Vec::new();
        let carbon = &self.carbon_model;

        if carbon.biomass_models.is_empty() {
            return Err(CanopyError::Configuration(
                "carbon_model.biomass_models must define at least one stratum".into(),
            ));
        }
        for (field, v) in [
            ("carbon_model.carbon_fraction", carbon.carbon_fraction),
            ("carbon_model.co2_to_c_ratio", carbon.co2_to_c_ratio),
        ] {
            if !v.is_finite() || v <= 0.0 {
                return Err(CanopyError::Configuration(format!(
                    "{field} must be a positive finite number, got {v}"
                )));
            }
        }
        if !(0.0..1.0).contains(&carbon.uncertainty) {
            return Err(CanopyError::Configuration(format!(
                "carbon_model.uncertainty must lie in [0, 1), got {}",
                carbon.uncertainty
            )));
        }

        let mut names = HashSet::new();
        let mut priorities = HashSet::new();
        for m in &carbon.biomass_models {
            if m.name.trim().is_empty() {
                return Err(CanopyError::Configuration("stratum with empty name".into()));
            }
            if !names.insert(m.name.as_str()) {
                return Err(CanopyError::Configuration(format!(
                    "duplicate stratum name '{}'",
                    m.name
                )));
            }
            if !m.a.is_finite() || !m.b.is_finite() {
                return Err(CanopyError::Configuration(format!(
                    "stratum '{}' has non-finite coefficients",
                    m.name
                )));
            }
            if !(m.ndvi_min < m.ndvi_max) {
                return Err(CanopyError::Configuration(format!(
                    "stratum '{}': ndvi_min ({}) must be below ndvi_max ({})",
                    m.name, m.ndvi_min, m.ndvi_max
                )));
            }
            if !priorities.insert(m.priority) {
                warnings.push(format!(
                    "stratum '{}' shares priority {} with another stratum; list order breaks the tie",
                    m.name, m.priority
                ));
            }
        }
        if !names.contains(carbon.default_model.as_str()) {
            return Err(CanopyError::Configuration(format!(
                "carbon_model.default_model '{}' names no configured stratum",
                carbon.default_model
            )));
        }

        for (field, v) in [
            ("quality.min_coverage_percent", self.quality.min_coverage_percent),
            ("eligibility.min_coverage_percent", self.eligibility.min_coverage_percent),
            ("change_detection.min_improvement_percent", self.change_detection.min_improvement_percent),
        ] {
            if !(0.0..=100.0).contains(&v) {
                return Err(CanopyError::Configuration(format!(
                    "{field} must be a percentage in [0, 100], got {v}"
                )));
            }
        }
        if self.change_detection.baseline_period_months > MAX_BASELINE_PERIOD_MONTHS {
            return Err(CanopyError::Configuration(format!(
                "change_detection.baseline_period_months must be at most {MAX_BASELINE_PERIOD_MONTHS}, got {}",
                self.change_detection.baseline_period_months
            )));
        }
        if self.change_detection.change_threshold < 0.0 {
            return Err(CanopyError::Configuration(
                "change_detection.change_threshold must not be negative".into(),
            ));
        }

        Ok(warnings)
    }
}

fn resolve_env_placeholders<F>(value: &mut serde_yaml::Value, lookup: &F) -> CanopyResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        serde_yaml::Value::String(s) => {
            if let Some(var) = s.strip_prefix("${").and_then(|rest| rest.strip_suffix('}')) {
                let resolved = lookup(var).ok_or_else(|| {
                    CanopyError::Configuration(format!("environment variable '{var}' not set"))
                })?;
                *value = serde_yaml::Value::String(resolved);
            }
        }
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                resolve_env_placeholders(item, lookup)?;
            }
        }
        serde_yaml::Value::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                resolve_env_placeholders(v, lookup)?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_yaml_yields_defaults() {
        let cfg = EngineConfig::from_yaml_with("", |_| None).unwrap();
        assert_eq!(cfg.carbon_model.carbon_fraction, 0.48);
        assert_eq!(cfg.carbon_model.co2_to_c_ratio, 3.67);
        assert_eq!(cfg.carbon_model.biomass_models.len(), 3);
        assert_eq!(cfg.eligibility.ndwi_threshold, -0.4);
        assert_eq!(cfg.change_detection.change_threshold, 0.1);
    }

    #[test]
    fn partial_yaml_overrides_section() {
        let yaml = r#"
carbon_model:
  uncertainty: 0.2
  default_model: dense_forest
  biomass_models:
    - { name: dense_forest, a: 100.0, b: 0.0, ndvi_min: 0.5, ndvi_max: 1.0, priority: 1, ndwi_gate: { min: -0.2 } }
eligibility:
  min_area_ha: 5.0
"#;
        let cfg = EngineConfig::from_yaml_with(yaml, |_| None).unwrap();
        assert_eq!(cfg.carbon_model.uncertainty, 0.2);
        assert_eq!(cfg.carbon_model.carbon_fraction, 0.48);
        assert_eq!(cfg.carbon_model.biomass_models[0].ndwi_gate, Some(NdwiGate { min: -0.2 }));
        assert_eq!(cfg.eligibility.min_area_ha, 5.0);
        assert_eq!(cfg.eligibility.min_ndvi, 0.3);
    }

    #[test]
    fn env_placeholders_are_resolved() {
        let yaml = "project:\n  name: ${PROJECT_NAME}\neligibility:\n  min_area_ha: ${MIN_AREA}\n";
        let cfg = EngineConfig::from_yaml_with(yaml, |v| match v {
            "PROJECT_NAME" => Some("Mau Forest".into()),
            "MIN_AREA" => Some("2.5".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.project.name, "Mau Forest");
        assert_eq!(cfg.eligibility.min_area_ha, 2.5);
    }

    #[test]
    fn missing_env_var_is_configuration_error() {
        let err = EngineConfig::from_yaml_with("project:\n  name: ${NOPE}\n", |_| None).unwrap_err();
        match err {
            CanopyError::Configuration(msg) => assert!(msg.contains("NOPE")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn env_values_substitute_as_text() {
        let yaml = "project:\n  name: ${NAME}\n  aoi: ${AOI}\n";
        let cfg = EngineConfig::from_yaml_with(yaml, |v| match v {
            "NAME" => Some("2024".into()),
            "AOI" => Some("a: b".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.project.name, "2024");
        assert_eq!(cfg.project.aoi, "a: b");
    }

    #[test]
    fn env_values_coerce_into_typed_fields() {
        let yaml = "change_detection:\n  enable: ${CD}\n  baseline_period_months: ${MONTHS}\n\
                    carbon_model:\n  uncertainty: ${U}\n";
        let cfg = EngineConfig::from_yaml_with(yaml, |v| match v {
            "CD" => Some("false".into()),
            "MONTHS" => Some("24".into()),
            "U" => Some(" 0.2 ".into()),
            _ => None,
        })
        .unwrap();
        assert!(!cfg.change_detection.enable);
        assert_eq!(cfg.change_detection.baseline_period_months, 24);
        assert_eq!(cfg.carbon_model.uncertainty, 0.2);
    }

    #[test]
    fn non_numeric_env_value_in_numeric_field_is_configuration_error() {
        let err = EngineConfig::from_yaml_with("eligibility:\n  min_area_ha: ${A}\n", |_| {
            Some("lots".into())
        })
        .unwrap_err();
        assert!(matches!(err, CanopyError::Configuration(_)));
    }

    #[test]
    fn missing_coefficient_is_configuration_error() {
        let yaml = "carbon_model:\n  biomass_models: [{ name: x, b: 0.0 }]\n";
        match EngineConfig::from_yaml_with(yaml, |_| None).unwrap_err() {
            CanopyError::Configuration(msg) => assert!(msg.contains("missing field `a`")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn malformed_yaml_is_configuration_error() {
        assert!(matches!(
            EngineConfig::from_yaml_with("carbon_model: [unclosed", |_| None),
            Err(CanopyError::Configuration(_))
        ));
    }

    #[test]
    fn look_back_is_bounded() {
        let mut cfg = EngineConfig::default();
        cfg.change_detection.baseline_period_months = MAX_BASELINE_PERIOD_MONTHS;
        assert!(cfg.validate().is_ok());
        cfg.change_detection.baseline_period_months = 10_000_000;
        assert!(matches!(cfg.validate(), Err(CanopyError::Configuration(_))));
    }

    #[test]
    fn inverted_ndvi_range_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.carbon_model.biomass_models[0].ndvi_min = 0.9;
        cfg.carbon_model.biomass_models[0].ndvi_max = 0.1;
        assert!(matches!(cfg.validate(), Err(CanopyError::Configuration(_))));
    }

    #[test]
    fn unknown_default_model_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.carbon_model.default_model = "mangrove".into();
        assert!(matches!(cfg.validate(), Err(CanopyError::Configuration(_))));
    }

    #[test]
    fn uncertainty_out_of_range_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.carbon_model.uncertainty = 1.0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn duplicate_priority_is_a_warning() {
        let mut cfg = EngineConfig::default();
        cfg.carbon_model.biomass_models[1].priority = 3;
        let warnings = cfg.validate().unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("moderate_forest"));
    }

    #[test]
    fn gate_is_strict() {
        let m = BiomassModel::new("dense_forest", 1.0, 0.0, 0.5, 1.0, 1).with_ndwi_gate(-0.2);
        assert!(m.selects(0.7, -0.1));
        assert!(!m.selects(0.7, -0.2));
        assert!(!m.selects(1.0, 0.0));
        assert!(m.selects(0.5, 0.0));
    }

    #[test]
    fn yaml_round_trip_keeps_strata() {
        let cfg = EngineConfig::default();
        let yaml = cfg.to_yaml().unwrap();
        let back = EngineConfig::from_yaml_with(&yaml, |_| None).unwrap();
        assert_eq!(back.carbon_model.biomass_models, cfg.carbon_model.biomass_models);
    }
}
