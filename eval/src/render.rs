// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Rendering of separation curves and uncertainty distributions
//!
//! The pipeline only talks to the `Renderer` trait. `CurveDataRenderer`
//! writes the figure data as CSV and JSON files that any plotting tool can
//! consume, and prints an AUC table when asked to show results.

use crate::error::{EvalError, Result};
use crate::separation::SeparationReport;
use crate::uncertainty::{Measure, UncertaintyMeasures};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const AUC_TABLE_FILE: &str = "roc_auc.json";

/// Presentation switches shared by both figures
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Plot uncertainty values on a natural-log scale
    pub log_scale: bool,
    /// Echo results to the console
    pub show: bool,
}

/// Trait for figure producers
pub trait Renderer {
    /// Render ROC curves (and successful-attack curves in adversarial mode)
    fn render_roc(&self, report: &SeparationReport, output_dir: &Path, options: &RenderOptions) -> Result<()>;

    /// Render in-domain versus out-domain distributions of every measure
    fn render_uncertainty_distributions(
        &self,
        in_measures: &UncertaintyMeasures,
        out_measures: &UncertaintyMeasures,
        output_dir: &Path,
        options: &RenderOptions,
    ) -> Result<()>;
}

/// Shared-edge histogram of one measure over both domains
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// `bins + 1` bin edges
    pub edges: Vec<f64>,
    pub in_counts: Vec<usize>,
    pub out_counts: Vec<usize>,
    /// Values dropped because the log scale needs them positive
    pub skipped: usize,
}

impl Histogram {
    pub fn compute(in_values: &[f64], out_values: &[f64], bins: usize, log_scale: bool) -> Self {
        let bins = bins.max(1);
        let mut skipped = 0;
        let mut transform = |values: &[f64]| -> Vec<f64> {
            values
                .iter()
                .filter_map(|&v| {
                    if !log_scale {
                        Some(v)
                    } else if v > 0.0 {
                        Some(v.ln())
                    } else {
                        skipped += 1;
                        None
                    }
                })
                .collect()
        };
        let in_t = transform(in_values);
        let out_t = transform(out_values);

        let (lo, hi) = in_t
            .iter()
            .chain(&out_t)
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let (lo, hi) = if lo > hi {
            (0.0, 1.0)
        } else if lo == hi {
            (lo - 0.5, hi + 0.5)
        } else {
            (lo, hi)
        };

        let width = (hi - lo) / bins as f64;
        let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();

        let count = |values: &[f64]| -> Vec<usize> {
            let mut counts = vec![0; bins];
            for &v in values {
                let idx = (((v - lo) / width) as usize).min(bins - 1);
                counts[idx] += 1;
            }
            counts
        };

        Self {
            in_counts: count(&in_t),
            out_counts: count(&out_t),
            edges,
            skipped,
        }
    }
}

#[derive(Debug, Serialize)]
struct AucEntry<'a> {
    measure: &'a str,
    title: &'a str,
    auroc: f64,
    aupr: f64,
    successful_auroc: Option<f64>,
}

#[derive(Debug, Serialize)]
struct AucTable<'a> {
    adversarial: bool,
    log_scale: bool,
    n_in: usize,
    n_out: usize,
    n_successful: usize,
    measures: Vec<AucEntry<'a>>,
}

/// Writes curve and histogram data files into the output directory
#[derive(Debug, Clone)]
pub struct CurveDataRenderer {
    pub bins: usize,
}

impl Default for CurveDataRenderer {
    fn default() -> Self {
        Self { bins: 50 }
    }
}

impl CurveDataRenderer {
    fn write_curve(path: &Path, fpr: &[f64], tpr: &[f64], thresholds: &[f64]) -> Result<()> {
        let mut writer = csv::Writer::from_path(path)?;
        writer.write_record(["fpr", "tpr", "uncertainty_threshold"])?;
        for ((f, t), s) in fpr.iter().zip(tpr).zip(thresholds) {
            // Scores are negated uncertainties; report thresholds on the measure's own scale
            writer.write_record([f.to_string(), t.to_string(), (-s).to_string()])?;
        }
        writer.flush().map_err(|e| EvalError::io(path, e))
    }
}

impl Renderer for CurveDataRenderer {
    fn render_roc(&self, report: &SeparationReport, output_dir: &Path, options: &RenderOptions) -> Result<()> {
        for sep in &report.measures {
            let path = output_dir.join(format!("roc_{}.csv", sep.measure.key()));
            Self::write_curve(&path, &sep.roc.fpr, &sep.roc.tpr, &sep.roc.thresholds)?;

            if let Some(ref successful) = sep.successful_only {
                let path = output_dir.join(format!("roc_{}_successful.csv", sep.measure.key()));
                Self::write_curve(&path, &successful.fpr, &successful.tpr, &successful.thresholds)?;
            }
        }

        let table = AucTable {
            adversarial: report.adversarial,
            log_scale: options.log_scale,
            n_in: report.n_in,
            n_out: report.n_out,
            n_successful: report.n_successful,
            measures: report
                .measures
                .iter()
                .map(|sep| AucEntry {
                    measure: sep.measure.key(),
                    title: sep.measure.title(),
                    auroc: sep.roc.auc,
                    aupr: sep.aupr,
                    successful_auroc: sep.successful_only.as_ref().map(|r| r.auc),
                })
                .collect(),
        };
        let path = output_dir.join(AUC_TABLE_FILE);
        let json = serde_json::to_string_pretty(&table)?;
        std::fs::write(&path, json).map_err(|e| EvalError::io(&path, e))?;
        tracing::info!("ROC data written for {} measures", report.measures.len());

        if options.show {
            println!("\nDomain separation (in-domain positive)");
            println!("{}", report.format());
        }

        Ok(())
    }

    fn render_uncertainty_distributions(
        &self,
        in_measures: &UncertaintyMeasures,
        out_measures: &UncertaintyMeasures,
        output_dir: &Path,
        options: &RenderOptions,
    ) -> Result<()> {
        for (measure, in_values) in in_measures.iter() {
            let Some(out_values) = out_measures.get(measure) else {
                tracing::warn!("Measure {} has no out-domain values, skipping histogram", measure);
                continue;
            };

            let hist = Histogram::compute(in_values, out_values, self.bins, options.log_scale);
            if hist.skipped > 0 {
                tracing::warn!(
                    "{}: {} non-positive values left out of the log-scale histogram",
                    measure,
                    hist.skipped
                );
            }
            write_histogram(&output_dir.join(format!("{}_histogram.csv", measure.key())), &hist)?;

            if options.show {
                print_summary(measure, in_values, out_values);
            }
        }
        Ok(())
    }
}

fn write_histogram(path: &Path, hist: &Histogram) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["bin_start", "bin_end", "in_count", "out_count"])?;
    for (i, (in_count, out_count)) in hist.in_counts.iter().zip(&hist.out_counts).enumerate() {
        writer.write_record([
            hist.edges[i].to_string(),
            hist.edges[i + 1].to_string(),
            in_count.to_string(),
            out_count.to_string(),
        ])?;
    }
    writer.flush().map_err(|e| EvalError::io(path, e))
}

fn print_summary(measure: Measure, in_values: &[f64], out_values: &[f64]) {
    let mean = |v: &[f64]| if v.is_empty() { 0.0 } else { v.iter().sum::<f64>() / v.len() as f64 };
    println!(
        "{:<40} in mean={:>10.4}  out mean={:>10.4}",
        measure.title(),
        mean(in_values),
        mean(out_values)
    );
}
