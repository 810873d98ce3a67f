// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Domain separation analysis
//!
//! In-domain examples are the positive class. Uncertainty measures grow with
//! uncertainty, so each measure is negated before ranking: a measure that
//! puts every in-domain value below every out-domain value scores AUC 1.0.
//!
//! In adversarial mode a second curve keeps every in-domain example but only
//! the out-domain examples whose attack reached its target class.

use crate::error::{EvalError, Result};
use crate::metrics::{average_precision, RocCurve};
use crate::uncertainty::{Measure, UncertaintyMeasures};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `n_in` ones followed by `n_out` zeros
pub fn domain_labels(n_in: usize, n_out: usize) -> Vec<u8> {
    let mut labels = vec![1u8; n_in];
    labels.extend(std::iter::repeat(0u8).take(n_out));
    labels
}

/// Concatenate in-domain then out-domain values per measure
pub fn concatenate_domains(
    in_measures: &UncertaintyMeasures,
    out_measures: &UncertaintyMeasures,
) -> Result<BTreeMap<Measure, Vec<f64>>> {
    let mut combined = BTreeMap::new();
    for (measure, in_values) in in_measures.iter() {
        let out_values = out_measures.get(measure).ok_or_else(|| {
            EvalError::Shape(format!("measure {} missing from out-domain results", measure))
        })?;
        let mut values = Vec::with_capacity(in_values.len() + out_values.len());
        values.extend_from_slice(in_values);
        values.extend_from_slice(out_values);
        combined.insert(measure, values);
    }
    Ok(combined)
}

/// Separation quality of one measure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasureSeparation {
    pub measure: Measure,
    pub roc: RocCurve,
    /// Average precision with in-domain as the positive class
    pub aupr: f64,
    /// Curve restricted to successful attacks, when any succeeded
    pub successful_only: Option<RocCurve>,
}

/// Separation results for every measure of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationReport {
    pub measures: Vec<MeasureSeparation>,
    pub adversarial: bool,
    pub n_in: usize,
    pub n_out: usize,
    /// Out-domain examples whose attack reached its target class
    pub n_successful: usize,
}

impl SeparationReport {
    pub fn get(&self, measure: Measure) -> Option<&MeasureSeparation> {
        self.measures.iter().find(|m| m.measure == measure)
    }

    /// Format the AUC table as a human-readable string
    pub fn format(&self) -> String {
        let mut output = String::new();
        output.push_str(&format!(
            "{:<24} {:>10} {:>10} {:>14}\n",
            "Measure", "AUROC", "AUPR", "AUROC (flips)"
        ));
        output.push_str(&format!("{:-<61}\n", ""));
        for m in &self.measures {
            let flips = m
                .successful_only
                .as_ref()
                .map_or("-".to_string(), |roc| format!("{:.4}", roc.auc));
            output.push_str(&format!(
                "{:<24} {:>10.4} {:>10.4} {:>14}\n",
                m.measure.key(),
                m.roc.auc,
                m.aupr,
                flips
            ));
        }
        output
    }
}

/// Compute ROC/AUC per measure against the domain labels
///
/// `values` maps each measure to the concatenation of in-domain and
/// out-domain values, index-aligned with `labels`. `flipped` has one entry
/// per out-domain example.
pub fn analyze(
    labels: &[u8],
    values: &BTreeMap<Measure, Vec<f64>>,
    flipped: &[bool],
    adversarial: bool,
) -> Result<SeparationReport> {
    let n_in = labels.iter().filter(|l| **l == 1).count();
    let n_out = labels.len() - n_in;
    if labels[..n_in].iter().any(|l| *l != 1) {
        return Err(EvalError::Shape(
            "domain labels must list every in-domain example before the out-domain ones".to_string(),
        ));
    }
    if flipped.len() != n_out {
        return Err(EvalError::Shape(format!(
            "{} flip flags for {} out-domain examples",
            flipped.len(),
            n_out
        )));
    }

    let positives: Vec<bool> = labels.iter().map(|l| *l == 1).collect();
    let n_successful = flipped.iter().filter(|f| **f).count();

    // In-domain rows always stay; out-domain rows only when the attack succeeded
    let keep: Vec<bool> = (0..labels.len())
        .map(|i| i < n_in || flipped[i - n_in])
        .collect();
    let kept_positives: Vec<bool> = positives
        .iter()
        .zip(&keep)
        .filter(|(_, k)| **k)
        .map(|(p, _)| *p)
        .collect();

    if adversarial && n_successful == 0 {
        tracing::warn!("No attack reached its target class; skipping successful-attack curves");
    }

    let mut measures = Vec::with_capacity(values.len());
    for (measure, measure_values) in values {
        if measure_values.len() != labels.len() {
            return Err(EvalError::Shape(format!(
                "measure {} has {} values for {} domain labels",
                measure,
                measure_values.len(),
                labels.len()
            )));
        }

        let scores: Vec<f64> = measure_values.iter().map(|v| -v).collect();
        let roc = RocCurve::compute(&positives, &scores)?;
        let aupr = average_precision(&positives, &scores)?;

        let successful_only = if adversarial && n_successful > 0 {
            let kept_scores: Vec<f64> = scores
                .iter()
                .zip(&keep)
                .filter(|(_, k)| **k)
                .map(|(s, _)| *s)
                .collect();
            Some(RocCurve::compute(&kept_positives, &kept_scores)?)
        } else {
            None
        };

        tracing::info!(
            "{}: AUROC={:.4} AUPR={:.4}{}",
            measure,
            roc.auc,
            aupr,
            successful_only
                .as_ref()
                .map_or(String::new(), |r| format!(" AUROC(successful)={:.4}", r.auc))
        );

        measures.push(MeasureSeparation {
            measure: *measure,
            roc,
            aupr,
            successful_only,
        });
    }

    Ok(SeparationReport {
        measures,
        adversarial,
        n_in,
        n_out,
        n_successful,
    })
}
