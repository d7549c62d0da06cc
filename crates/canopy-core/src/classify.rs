//! Forest-type stratification.
//!
//! Strata are ordered once, at construction, by descending priority (stable,
//! so equal priorities keep configuration order). Each pixel takes the first
//! stratum in that order that selects it, which is the same as applying the
//! strata as masks in order without ever overwriting an assigned pixel.

#[cfg(feature = "threading")]
use rayon::prelude::*;
use serde::Serialize;

use crate::config::BiomassModel;
use crate::error::CanopyError;
use crate::events::{tracing_listener, AssessmentEvent, SharedListener};
use crate::grid::Grid;
use crate::CanopyResult;

/// Integer code used for unclassified pixels in exported label rasters.
pub const UNCLASSIFIED: i32 = -1;

/// Biomass models in evaluation order. Index `i` here is stratum label `i`.
#[derive(Debug, Clone)]
pub struct StratumSet {
    ordered: Vec<BiomassModel>,
}

impl StratumSet {
    pub fn new(models: &[BiomassModel]) -> CanopyResult<Self> {
        if models.is_empty() {
            return Err(CanopyError::Configuration("no biomass strata configured".into()));
        }
        let mut ordered = models.to_vec();
        ordered.sort_by_key(|m| std::cmp::Reverse(m.priority));
        Ok(Self { ordered })
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn get(&self, label: usize) -> Option<&BiomassModel> {
        self.ordered.get(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &BiomassModel)> {
        self.ordered.iter().enumerate()
    }

    pub fn find(&self, name: &str) -> Option<&BiomassModel> {
        self.ordered.iter().find(|m| m.name == name)
    }

    /// Label of the first stratum that selects this pixel.
    #[inline]
    pub fn label_for(&self, ndvi: f64, ndwi: f64) -> Option<usize> {
        self.ordered.iter().position(|m| m.selects(ndvi, ndwi))
    }
}

/// One label per pixel; `None` = unclassified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForestTypeMap {
    pub labels: Vec<Option<usize>>,
    pub n_strata: usize,
}

impl ForestTypeMap {
    /// Pixel count per stratum label.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_strata];
        for &l in self.labels.iter().flatten() {
            counts[l] += 1;
        }
        counts
    }

    pub fn classified_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_some()).count()
    }

    pub fn unclassified_count(&self) -> usize {
        self.labels.len() - self.classified_count()
    }

    /// Labels as integers with [`UNCLASSIFIED`] for unassigned pixels.
    pub fn to_codes(&self) -> Vec<i32> {
        self.labels
            .iter()
            .map(|l| l.map_or(UNCLASSIFIED, |i| i as i32))
            .collect()
    }
}

pub struct ForestClassifier {
    strata: StratumSet,
    listener: SharedListener,
}

impl ForestClassifier {
    pub fn new(models: &[BiomassModel]) -> CanopyResult<Self> {
        Ok(Self {
            strata: StratumSet::new(models)?,
            listener: tracing_listener(),
        })
    }

    pub fn with_listener(mut self, listener: SharedListener) -> Self {
        self.listener = listener;
        self
    }

    pub fn strata(&self) -> &StratumSet {
        &self.strata
    }

    /// Classify a flattened pixel population. NaN pixels never match a stratum.
    pub fn classify(&self, ndvi: &[f64], ndwi: &[f64]) -> CanopyResult<ForestTypeMap> {
        if ndvi.len() != ndwi.len() {
            return Err(CanopyError::ShapeMismatch {
                expected: format!("{} NDWI values", ndvi.len()),
                found: format!("{} NDWI values", ndwi.len()),
            });
        }

        #[cfg(feature = "threading")]
        let labels: Vec<Option<usize>> = ndvi
            .par_iter()
            .zip(ndwi.par_iter())
            .map(|(&v, &w)| self.strata.label_for(v, w))
            .collect();

        #[cfg(not(feature = "threading"))]
        let labels: Vec<Option<usize>> = ndvi
            .iter()
            .zip(ndwi.iter())
            .map(|(&v, &w)| self.strata.label_for(v, w))
            .collect();

        let map = ForestTypeMap {
            labels,
            n_strata: self.strata.len(),
        };
        self.listener.on_event(&AssessmentEvent::PixelsClassified {
            total_pixels: map.labels.len(),
            classified_pixels: map.classified_count(),
            unclassified_pixels: map.unclassified_count(),
        });
        Ok(map)
    }

    /// Classify two co-registered grids pixel by pixel.
    pub fn classify_grids(&self, ndvi: &Grid, ndwi: &Grid) -> CanopyResult<ForestTypeMap> {
        ndvi.ensure_same_shape(ndwi)?;
        self.classify(&ndvi.data, &ndwi.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullListener;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    fn classifier(models: &[BiomassModel]) -> ForestClassifier {
        ForestClassifier::new(models)
            .unwrap()
            .with_listener(Arc::new(NullListener))
    }

    fn high_low() -> Vec<BiomassModel> {
        vec![
            BiomassModel::new("low", 50.0, 0.0, 0.0, 0.5, 1),
            BiomassModel::new("high", 100.0, 0.0, 0.5, 1.0, 2),
        ]
    }

    #[test]
    fn dense_forest_scenario() {
        let models = vec![BiomassModel::new("dense_forest", 100.0, 0.0, 0.5, 1.0, 1).with_ndwi_gate(-0.2)];
        let c = classifier(&models);
        let map = c.classify(&vec![0.6; 100], &vec![0.1; 100]).unwrap();
        assert_eq!(map.counts(), vec![100]);
        assert_eq!(map.unclassified_count(), 0);
    }

    #[test]
    fn lower_bound_inclusive_upper_exclusive() {
        let c = classifier(&high_low());
        assert_eq!(c.strata().get(0).unwrap().name, "high");
        let map = c.classify(&[0.5, 0.4999, 1.0], &[0.0, 0.0, 0.0]).unwrap();
        assert_eq!(map.labels, vec![Some(0), Some(1), None]);
    }

    #[test]
    fn ndwi_gate_blocks_dry_pixels() {
        let models = vec![BiomassModel::new("dense_forest", 100.0, 0.0, 0.5, 1.0, 1).with_ndwi_gate(-0.2)];
        let map = classifier(&models).classify(&[0.7, 0.7], &[-0.2, -0.19]).unwrap();
        assert_eq!(map.labels, vec![None, Some(0)]);
    }

    #[test]
    fn nan_pixels_stay_unclassified() {
        let map = classifier(&high_low())
            .classify(&[f64::NAN, 0.7], &[0.0, f64::NAN])
            .unwrap();
        assert_eq!(map.labels[0], None);
        // Ungated stratum: NaN NDWI does not matter.
        assert_eq!(map.labels[1], Some(0));
        assert_eq!(map.to_codes(), vec![UNCLASSIFIED, 0]);
    }

    #[test]
    fn overlapping_strata_respect_priority_regardless_of_config_order() {
        let a = BiomassModel::new("broad", 10.0, 0.0, 0.0, 1.0, 1);
        let b = BiomassModel::new("narrow", 20.0, 0.0, 0.4, 0.6, 5);
        for models in [vec![a.clone(), b.clone()], vec![b.clone(), a.clone()]] {
            let c = classifier(&models);
            let map = c.classify(&[0.5, 0.8], &[0.0, 0.0]).unwrap();
            let names: Vec<_> = map
                .labels
                .iter()
                .map(|l| c.strata().get(l.unwrap()).unwrap().name.clone())
                .collect();
            assert_eq!(names, vec!["narrow", "broad"]);
        }
    }

    #[test]
    fn equal_priority_falls_back_to_config_order() {
        let models = vec![
            BiomassModel::new("first", 1.0, 0.0, 0.0, 1.0, 1),
            BiomassModel::new("second", 1.0, 0.0, 0.0, 1.0, 1),
        ];
        let c = classifier(&models);
        assert_eq!(c.strata().get(0).unwrap().name, "first");
        assert_eq!(c.classify(&[0.3], &[0.0]).unwrap().labels, vec![Some(0)]);
    }

    #[test]
    fn mismatched_lengths_rejected() {
        assert!(matches!(
            classifier(&high_low()).classify(&[0.1, 0.2], &[0.0]),
            Err(CanopyError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn empty_strata_is_configuration_error() {
        assert!(matches!(
            ForestClassifier::new(&[]),
            Err(CanopyError::Configuration(_))
        ));
    }

    /// Exclusivity, idempotence and priority monotonicity over random inputs.
    #[test]
    fn random_populations_are_exclusive_and_idempotent() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let n_strata = rng.gen_range(1..5);
            let models: Vec<BiomassModel> = (0..n_strata)
                .map(|i| {
                    let lo: f64 = rng.gen_range(-1.0..0.9);
                    let hi: f64 = rng.gen_range(lo + 0.01..=1.0);
                    let m = BiomassModel::new(format!("s{i}"), 1.0, 0.0, lo, hi, rng.gen_range(0..10));
                    if rng.gen_bool(0.5) {
                        m.with_ndwi_gate(rng.gen_range(-0.5..0.5))
                    } else {
                        m
                    }
                })
                .collect();
            let c = classifier(&models);
            let ndvi: Vec<f64> = (0..200).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let ndwi: Vec<f64> = (0..200).map(|_| rng.gen_range(-1.0..1.0)).collect();

            let first = c.classify(&ndvi, &ndwi).unwrap();
            let second = c.classify(&ndvi, &ndwi).unwrap();
            assert_eq!(first, second);
            assert_eq!(first.counts().iter().sum::<usize>() + first.unclassified_count(), 200);

            for (p, label) in first.labels.iter().enumerate() {
                let selecting: Vec<usize> = c
                    .strata()
                    .iter()
                    .filter(|(_, m)| m.selects(ndvi[p], ndwi[p]))
                    .map(|(i, _)| i)
                    .collect();
                match label {
                    None => assert!(selecting.is_empty()),
                    Some(l) => {
                        let chosen = c.strata().get(*l).unwrap();
                        for i in selecting {
                            assert!(c.strata().get(i).unwrap().priority <= chosen.priority);
                        }
                    }
                }
            }
        }
    }
}
