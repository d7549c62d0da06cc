//! Carbon credit assessment over co-registered NDVI/NDWI grids.
//!
//! Acquisition, reprojection and polygon rasterisation happen upstream; this
//! crate starts from in-memory grids and ends with a results record.

pub mod carbon;
pub mod change;
pub mod classify;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod events;
pub mod geo;
pub mod grid;
pub mod pipeline;
pub mod quality;
pub mod report;
pub mod stats;
pub mod temporal;

pub use carbon::{CarbonModel, CarbonResult};
pub use change::{baseline_period, ChangeDetector, Trend};
pub use classify::{ForestClassifier, ForestTypeMap, StratumSet, UNCLASSIFIED};
pub use config::{BiomassModel, EngineConfig};
pub use eligibility::{EligibilityCriterion, EligibilityEngine, EligibilityStatus};
pub use error::CanopyError;
pub use events::{AssessmentEvent, EventListener, SharedListener};
pub use geo::{AffineTransform, Crs, GeoReference};
pub use grid::{Grid, PixelMask};
pub use pipeline::{AssessmentInputs, AssessmentPipeline, AssessmentResults};
pub use quality::QualityGate;
pub use stats::IndexStatistics;
pub use temporal::{temporal_composite, CompositeMethod, TemporalStability};

pub type CanopyResult<T> = Result<T, CanopyError>;
