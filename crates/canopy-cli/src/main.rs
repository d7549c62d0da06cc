//! `canopy`: run a carbon credit assessment over NDVI/NDWI grids stored as
//! JSON, print the text report and write the results record.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use canopy_core::{
    baseline_period, report::assessment_report, temporal_composite, AffineTransform,
    AssessmentInputs, AssessmentPipeline, CompositeMethod, Crs, EngineConfig, GeoReference, Grid,
    PixelMask,
};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "canopy", about = "Satellite-index carbon credit assessment")]
struct Cli {
    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Assess one parcel and print the report.
    Assess(AssessArgs),
    /// Print the historical acquisition window for a date.
    BaselineWindow {
        /// Current acquisition date (YYYY-MM-DD).
        #[arg(short, long)]
        date: NaiveDate,
        #[arg(short, long, default_value_t = 12)]
        months: u32,
    },
}

#[derive(clap::Args, Debug)]
struct AssessArgs {
    /// YAML configuration. Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// NDVI grid JSON. Repeat to composite several acquisitions.
    #[arg(long, required = true)]
    ndvi: Vec<PathBuf>,

    /// NDWI grid JSON. Repeat to composite several acquisitions.
    #[arg(long, required = true)]
    ndwi: Vec<PathBuf>,

    /// Compositing method for repeated grids (median, mean, max, min).
    #[arg(long, default_value = "median")]
    composite: String,

    /// Historical NDVI grid JSON for change detection.
    #[arg(short, long)]
    baseline: Option<PathBuf>,

    /// Rasterised area-of-interest mask JSON.
    #[arg(short, long)]
    mask: Option<PathBuf>,

    /// JSON array of mean NDVI observations for the stability check.
    #[arg(long)]
    history: Option<PathBuf>,

    /// Current acquisition date (YYYY-MM-DD).
    #[arg(long)]
    date: Option<NaiveDate>,

    /// Where to write the results record.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

// ── Serde helpers ─────────────────────────────────────────────────────────────

fn null_as_nan_vec<'de, D: serde::Deserializer<'de>>(
    d: D,
) -> std::result::Result<Vec<f64>, D::Error> {
    let v: Vec<Option<f64>> = Vec::deserialize(d)?;
    Ok(v.into_iter().map(|x| x.unwrap_or(f64::NAN)).collect())
}

/// On-disk grid. `null` entries are no-data.
#[derive(Deserialize)]
struct GridFile {
    #[serde(deserialize_with = "null_as_nan_vec")]
    data: Vec<f64>,
    width: usize,
    height: usize,
    /// EPSG code.
    crs: Option<u32>,
    /// GDAL order: `[c, a, b, f, d, e]`.
    transform: Option<[f64; 6]>,
}

impl GridFile {
    fn georef(&self) -> Result<Option<GeoReference>> {
        match (self.crs, self.transform) {
            (Some(epsg), Some([c, a, b, f, d, e])) => Ok(Some(GeoReference::new(
                Crs::from_epsg(epsg)?,
                AffineTransform { a, b, c, d, e, f },
            ))),
            (None, None) => Ok(None),
            _ => bail!("grid must carry both `crs` and `transform`, or neither"),
        }
    }
}

#[derive(Deserialize)]
struct MaskFile {
    data: Vec<bool>,
    width: usize,
    height: usize,
}

// ── Loading ───────────────────────────────────────────────────────────────────

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Cannot read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Load grids, returning them with the first georeference found.
fn load_grids(paths: &[PathBuf]) -> Result<(Vec<Grid>, Option<GeoReference>)> {
    let mut grids = Vec::with_capacity(paths.len());
    let mut georef = None;
    for path in paths {
        let file: GridFile = read_json(path)?;
        if georef.is_none() {
            georef = file.georef()?;
        }
        grids.push(
            Grid::from_vec(file.width, file.height, file.data)
                .with_context(|| format!("Bad grid in {}", path.display()))?,
        );
    }
    Ok((grids, georef))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(p) => {
            let text = fs::read_to_string(p)
                .with_context(|| format!("Cannot read {}", p.display()))?;
            EngineConfig::from_yaml_str(&text)
                .with_context(|| format!("Invalid configuration in {}", p.display()))
        }
        None => Ok(EngineConfig::default()),
    }
}

fn stack(paths: &[PathBuf], method: CompositeMethod) -> Result<(Grid, Option<GeoReference>)> {
    let (grids, georef) = load_grids(paths)?;
    let grid = temporal_composite(&grids, method, &canopy_core::events::TracingListener)?;
    Ok((grid, georef))
}

fn assess(args: AssessArgs) -> Result<()> {
    let config = load_config(args.config.as_deref())?;
    let method: CompositeMethod = args.composite.parse()?;

    let (ndvi, ndvi_georef) = stack(&args.ndvi, method)?;
    let (ndwi, ndwi_georef) = stack(&args.ndwi, method)?;
    let Some(georef) = ndvi_georef.or(ndwi_georef) else {
        bail!("no input grid carries `crs` and `transform`; pixel area is undefined");
    };

    let mut inputs = AssessmentInputs::new(ndvi, ndwi, georef);
    if let Some(path) = &args.baseline {
        let (mut grids, _) = load_grids(std::slice::from_ref(path))?;
        if let Some(baseline) = grids.pop() {
            inputs = inputs.with_baseline(baseline);
        }
    }
    if let Some(path) = &args.mask {
        let m: MaskFile = read_json(path)?;
        inputs = inputs.with_mask(PixelMask::from_vec(m.width, m.height, m.data)?);
    }
    if let Some(path) = &args.history {
        inputs = inputs.with_history(read_json(path)?);
    }
    if let Some(date) = args.date {
        inputs = inputs.acquired_on(date);
    }

    info!(project = %config.project.name, "starting assessment");
    let results = AssessmentPipeline::new(config)?.run(&inputs)?;
    println!("{}", assessment_report(&results));

    if let Some(out) = &args.output {
        if let Some(dir) = out.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .with_context(|| format!("Cannot create {}", dir.display()))?;
        }
        let json = serde_json::to_string_pretty(&results)?;
        fs::write(out, json).with_context(|| format!("Write failed: {}", out.display()))?;
        info!(path = %out.display(), "results saved");
    }
    Ok(())
}

// ── main ──────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("canopy={0},canopy_core={0}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Assess(args) => assess(args),
        Command::BaselineWindow { date, months } => {
            let window = baseline_period(date, months)?;
            println!("{}", serde_json::to_string_pretty(&window)?);
            Ok(())
        }
    }
}
