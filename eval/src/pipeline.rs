// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Adversarial evaluation pipeline
//!
//! Orchestrates:
//! - Output directory preparation (before the classifier is touched)
//! - In-domain and out-domain evaluation plus label alignment
//! - Attack outcome masks and classification error
//! - Uncertainty measures for both domains
//! - Domain separation analysis and rendering
//! - Results serialization
//!
//! Every numeric result is computed before the first score file is written,
//! so a degenerate row aborts the run without leaving partial outputs.

use crate::classifier::Classifier;
use crate::error::{Domain, Result};
use crate::harness::{check_alignment, evaluate_domain, InferenceParams};
use crate::metrics::accuracy;
use crate::outcome::{classify_outcomes, AttackObjective};
use crate::render::{RenderOptions, Renderer};
use crate::separation::{analyze, concatenate_domains, domain_labels, SeparationReport};
use crate::uncertainty::{Measure, UncertaintyCalculator};
use crate::writer::{prepare_output_dir, ResultWriter, SUMMARY_FILE};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for one adversarial evaluation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdversarialEvalConfig {
    /// Clean dataset pattern
    pub in_domain_pattern: PathBuf,
    /// Perturbed counterpart of the clean pattern
    pub out_domain_pattern: PathBuf,
    /// Directory receiving every output of the run
    pub output_dir: PathBuf,
    pub inference: InferenceParams,
    pub objective: AttackObjective,
    /// Plot uncertainty distributions on a log scale
    pub log_scale: bool,
    /// Replace existing results in `output_dir`
    pub overwrite: bool,
    /// Echo separation results to the console
    pub show: bool,
    /// Guard for `ln p` on zero probabilities; `None` rejects such rows
    pub log_epsilon: Option<f64>,
}

impl Default for AdversarialEvalConfig {
    fn default() -> Self {
        Self {
            in_domain_pattern: PathBuf::from("data/in_domain"),
            out_domain_pattern: PathBuf::from("data/out_domain"),
            output_dir: PathBuf::from("eval/results"),
            inference: InferenceParams::default(),
            objective: AttackObjective::RunnerUp,
            log_scale: false,
            overwrite: false,
            show: false,
            log_epsilon: None,
        }
    }
}

/// Mean and standard deviation of logits per domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogitStats {
    pub in_mean: f64,
    pub in_std: f64,
    pub out_mean: f64,
    pub out_std: f64,
}

/// AUC summary for one measure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureSummary {
    pub measure: Measure,
    pub auroc: f64,
    pub aupr: f64,
    pub successful_auroc: Option<f64>,
}

/// Complete adversarial evaluation results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdversarialEvalResults {
    pub config: AdversarialEvalConfig,
    pub classifier: String,
    pub n_examples: usize,
    pub n_classes: usize,
    /// `1 - accuracy` on the perturbed inputs
    pub classification_error: f64,
    /// Fraction of attacks that reached their target class
    pub success_rate: f64,
    /// Fraction of examples whose prediction changed at all
    pub class_change_rate: f64,
    pub logit_stats: LogitStats,
    pub separation: Vec<MeasureSummary>,
    pub timestamp: DateTime<Utc>,
    pub version: String,
}

impl AdversarialEvalResults {
    /// Format as a human-readable string
    pub fn format(&self) -> String {
        let mut output = format!(
            r#"Adversarial Evaluation
======================
Classifier:          {}
Examples:            {}
Classes:             {}
Objective:           {:?}
Classification Error: {:.1}%
Success Rate:        {:.1}%
Class Change Rate:   {:.1}%
"#,
            self.classifier,
            self.n_examples,
            self.n_classes,
            self.config.objective,
            100.0 * self.classification_error,
            100.0 * self.success_rate,
            100.0 * self.class_change_rate,
        );

        output.push_str("\nAUROC per measure:\n");
        for s in &self.separation {
            let flips = s.successful_auroc.map_or("-".to_string(), |v| format!("{:.4}", v));
            output.push_str(&format!(
                "  {:<22} {:.4} (successful attacks: {})\n",
                s.measure.key(),
                s.auroc,
                flips
            ));
        }
        output
    }
}

/// Main adversarial evaluation pipeline
pub struct AdversarialPipeline<'a> {
    config: AdversarialEvalConfig,
    classifier: &'a dyn Classifier,
    renderer: &'a dyn Renderer,
}

impl<'a> AdversarialPipeline<'a> {
    pub fn new(config: AdversarialEvalConfig, classifier: &'a dyn Classifier, renderer: &'a dyn Renderer) -> Self {
        Self {
            config,
            classifier,
            renderer,
        }
    }

    pub fn config(&self) -> &AdversarialEvalConfig {
        &self.config
    }

    /// Run the full evaluation
    pub fn run(&self) -> Result<AdversarialEvalResults> {
        let config = &self.config;
        prepare_output_dir(&config.output_dir, config.overwrite)?;

        let in_batch = evaluate_domain(self.classifier, &config.in_domain_pattern, &config.inference, Domain::In)?;
        let out_batch = evaluate_domain(self.classifier, &config.out_domain_pattern, &config.inference, Domain::Out)?;
        check_alignment(&in_batch, &out_batch)?;

        let in_preds = in_batch.predictions();
        let out_preds = out_batch.predictions();
        let outcomes = classify_outcomes(in_batch.probs(), &in_preds, &out_preds, config.objective)?;
        let classification_error = 1.0 - accuracy(out_batch.labels(), &out_preds)?;

        let (in_mean, in_std) = in_batch.logit_stats();
        let (out_mean, out_std) = out_batch.logit_stats();
        tracing::info!("In-domain logits: mean={:.4} std={:.4}", in_mean, in_std);
        tracing::info!("Out-domain logits: mean={:.4} std={:.4}", out_mean, out_std);

        let calculator = match config.log_epsilon {
            Some(eps) => UncertaintyCalculator::new().with_log_epsilon(eps),
            None => UncertaintyCalculator::new(),
        };
        let in_alphas = in_batch.alphas();
        let out_alphas = out_batch.alphas();
        let in_uncertainties = calculator.compute(Domain::In, in_batch.probs(), in_alphas.view())?;
        let out_uncertainties = calculator.compute(Domain::Out, out_batch.probs(), out_alphas.view())?;

        let labels = domain_labels(in_batch.len(), out_batch.len());
        let combined = concatenate_domains(&in_uncertainties, &out_uncertainties)?;
        let report = analyze(&labels, &combined, &outcomes.flipped, true)?;

        let writer = ResultWriter::new(&config.output_dir);
        writer.write_successful_attacks(&outcomes.flipped)?;
        writer.write_class_flipped(&outcomes.class_changed)?;
        writer.append_summary(classification_error, outcomes.success_rate())?;
        writer.write_measures(&in_uncertainties, Domain::In)?;
        writer.write_measures(&out_uncertainties, Domain::Out)?;

        tracing::info!(
            "Classification error {:.1}%, adversarial success rate {:.1}% ({} of {} attacks)",
            100.0 * classification_error,
            100.0 * outcomes.success_rate(),
            outcomes.flipped_count(),
            outcomes.len()
        );

        let options = RenderOptions {
            log_scale: config.log_scale,
            show: config.show,
        };
        self.renderer.render_roc(&report, &config.output_dir, &options)?;
        self.renderer
            .render_uncertainty_distributions(&in_uncertainties, &out_uncertainties, &config.output_dir, &options)?;

        let results = AdversarialEvalResults {
            config: config.clone(),
            classifier: self.classifier.name().to_string(),
            n_examples: in_batch.len(),
            n_classes: in_batch.n_classes(),
            classification_error,
            success_rate: outcomes.success_rate(),
            class_change_rate: outcomes.change_rate(),
            logit_stats: LogitStats {
                in_mean,
                in_std,
                out_mean,
                out_std,
            },
            separation: summarize(&report),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        writer.write_json(SUMMARY_FILE, &results)?;

        Ok(results)
    }
}

fn summarize(report: &SeparationReport) -> Vec<MeasureSummary> {
    report
        .measures
        .iter()
        .map(|sep| MeasureSummary {
            measure: sep.measure,
            auroc: sep.roc.auc,
            aupr: sep.aupr,
            successful_auroc: sep.successful_only.as_ref().map(|r| r.auc),
        })
        .collect()
}
