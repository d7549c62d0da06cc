//! Plain-text rendering of an [`AssessmentResults`] record.

use std::fmt::Write;

use crate::pipeline::AssessmentResults;
use crate::stats::IndexStatistics;

const WIDTH: usize = 80;

fn section(out: &mut String, title: &str) {
    let rule = "-".repeat(WIDTH);
    let _ = writeln!(out, "{rule}\n{title}\n{rule}");
}

fn index_block(out: &mut String, label: &str, s: &IndexStatistics) {
    let _ = writeln!(out, "{label} Statistics:");
    for (k, v) in [
        ("mean", s.mean),
        ("std", s.std),
        ("min", s.min),
        ("max", s.max),
        ("median", s.median),
        ("q25", s.q25),
        ("q75", s.q75),
    ] {
        let _ = writeln!(out, "  {k}: {v:.4}");
    }
    let _ = writeln!(out, "  count: {}\n", s.count);
}

pub fn assessment_report(results: &AssessmentResults) -> String {
    let mut out = String::new();
    let rule = "=".repeat(WIDTH);
    let _ = writeln!(out, "\n{rule}\nCARBON CREDIT ASSESSMENT REPORT\n{rule}\n");

    section(&mut out, "PROJECT INFORMATION");
    let p = &results.project;
    let _ = writeln!(out, "Project Name: {}", or_na(&p.name));
    let _ = writeln!(out, "AOI: {}", or_na(&p.aoi));
    let period = p
        .time_intervals
        .iter()
        .map(|(start, end)| format!("{start} to {end}"))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(out, "Time Period: {}", or_na(&period));
    let _ = writeln!(out, "CRS: {}\n", results.crs);

    section(&mut out, "DATA QUALITY");
    for r in &results.quality.reports {
        let verdict = if r.passed { "PASSED" } else { "FAILED" };
        let _ = writeln!(
            out,
            "{}: {:.1}% coverage ({}/{} valid pixels) {}",
            r.label, r.coverage_percent, r.valid_pixels, r.total_pixels, verdict
        );
    }
    out.push('\n');

    section(&mut out, "VEGETATION INDICES");
    index_block(&mut out, "NDVI", &results.ndvi_stats);
    index_block(&mut out, "NDWI", &results.ndwi_stats);

    section(&mut out, "CARBON CALCULATION");
    let c = &results.carbon;
    let _ = writeln!(out, "Total Area: {:.2} hectares", c.total_area_ha);
    let _ = writeln!(out, "Total CO2e: {:.2} tonnes", c.total_co2e);
    let _ = writeln!(out, "CO2e per hectare: {:.2} tonnes/ha", c.co2e_per_ha);
    let _ = writeln!(out, "Credits Issued: {}\n", c.credits_issued);
    let u = &c.uncertainty;
    let _ = writeln!(out, "Uncertainty Bounds:");
    let _ = writeln!(out, "  Lower: {:.2} tonnes CO2e", u.lower_bound);
    let _ = writeln!(out, "  Upper: {:.2} tonnes CO2e", u.upper_bound);
    let _ = writeln!(out, "  Confidence: {}\n", u.confidence_interval);

    if !c.breakdown.is_empty() {
        let _ = writeln!(out, "Breakdown by Forest Type:");
        for e in &c.breakdown {
            let _ = writeln!(out, "  {}:", e.name);
            let _ = writeln!(out, "    Pixels: {}", e.pixel_count);
            let _ = writeln!(out, "    Area: {:.2} ha", e.area_ha);
            let _ = writeln!(out, "    Mean NDVI: {:.3}", e.mean_ndvi);
            let _ = writeln!(out, "    Mean AGB: {:.2} t/ha", e.mean_agb_per_ha);
            let _ = writeln!(out, "    CO2e: {:.2} tonnes", e.total_co2e);
        }
        let unclassified = c.valid_pixels - c.classified_pixels();
        if unclassified > 0 {
            let _ = writeln!(out, "  unclassified: {unclassified} pixels (counted in total area)");
        }
        out.push('\n');
    }

    if let Some(cd) = &results.change_detection {
        section(&mut out, "CHANGE DETECTION");
        if let Some(w) = &results.baseline_window {
            let _ = writeln!(out, "Baseline Window: {} to {}", w.start, w.end);
        }
        let _ = writeln!(out, "Mean NDVI Change: {:+.4}", cd.mean_change);
        let _ = writeln!(out, "Improved: {:.1}% ({} pixels)", cd.percent_improved, cd.pixels_improved);
        let _ = writeln!(out, "Degraded: {:.1}% ({} pixels)", cd.percent_degraded, cd.pixels_degraded);
        let _ = writeln!(out, "Valid Pixels: {:.1}%", cd.valid_pixel_percent);
        let _ = writeln!(out, "Trend: {}\n", cd.trend);
    }

    if let Some(ts) = &results.temporal_stability {
        section(&mut out, "TEMPORAL STABILITY");
        let _ = writeln!(out, "Observations: {}", ts.n_observations);
        if let Some(cv) = ts.cv {
            let _ = writeln!(out, "Coefficient of Variation: {cv:.3}");
        }
        let _ = writeln!(out, "{}\n", ts.message);
    }

    out.push_str(&results.eligibility_report);
    let _ = writeln!(out, "\nProcessing time: {} ms", results.elapsed_ms);
    out
}

fn or_na(s: &str) -> &str {
    if s.is_empty() {
        "N/A"
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::events::NullListener;
    use crate::geo::{AffineTransform, Crs, GeoReference};
    use crate::grid::Grid;
    use crate::pipeline::{AssessmentInputs, AssessmentPipeline};
    use std::sync::Arc;

    fn run(inputs: AssessmentInputs) -> AssessmentResults {
        let mut config = EngineConfig::default();
        config.project.name = "Mau Forest Block 7".into();
        AssessmentPipeline::new(config)
            .unwrap()
            .with_listener(Arc::new(NullListener))
            .run(&inputs)
            .unwrap()
    }

    fn georef() -> GeoReference {
        GeoReference::new(
            Crs::from_epsg(32736).unwrap(),
            AffineTransform::north_up(500_000.0, 9_950_000.0, 10.0, 10.0),
        )
    }

    #[test]
    fn report_has_every_section() {
        let mut ndvi = Grid::filled(30, 30, 0.7);
        ndvi.set(0, 0, 0.1);
        let inputs = AssessmentInputs::new(ndvi, Grid::filled(30, 30, 0.0), georef())
            .with_baseline(Grid::filled(30, 30, 0.4));
        let text = assessment_report(&run(inputs));
        for heading in [
            "CARBON CREDIT ASSESSMENT REPORT",
            "PROJECT INFORMATION",
            "DATA QUALITY",
            "VEGETATION INDICES",
            "CARBON CALCULATION",
            "CHANGE DETECTION",
            "CARBON CREDIT ELIGIBILITY ASSESSMENT REPORT",
        ] {
            assert!(text.contains(heading), "missing {heading}");
        }
        assert!(text.contains("Project Name: Mau Forest Block 7"));
        assert!(text.contains("Confidence: ±15%"));
        assert!(text.contains("dense_forest:"));
        assert!(text.contains("unclassified: 1 pixels"));
        assert!(text.contains("Trend: SIGNIFICANT_IMPROVEMENT"));
        assert!(text.contains("FINAL STATUS: ELIGIBLE"));
    }

    #[test]
    fn optional_sections_are_omitted() {
        let inputs = AssessmentInputs::new(Grid::filled(30, 30, 0.7), Grid::filled(30, 30, 0.0), georef());
        let text = assessment_report(&run(inputs));
        assert!(!text.contains("CHANGE DETECTION"));
        assert!(!text.contains("TEMPORAL STABILITY"));
        assert!(text.contains("AOI: N/A"));
    }
}
