// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation harness: runs the classifier over one dataset pattern and
//! checks that paired in-domain and out-domain evaluations describe the same
//! examples.

use crate::classifier::Classifier;
use crate::error::{Domain, EvalError, Result};
use crate::outcome::argmax_rows;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Parameters forwarded to the classifier for one evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceParams {
    /// Examples per inference batch
    pub batch_size: usize,
    /// Stochastic forward passes averaged per example
    pub sample_count: usize,
    /// Dropout retention probability in (0, 1]
    pub dropout_retention: f64,
    /// Standard deviation of additive Gaussian input noise
    pub corruption_level: f64,
}

impl Default for InferenceParams {
    fn default() -> Self {
        Self {
            batch_size: 100,
            sample_count: 1,
            dropout_retention: 1.0,
            corruption_level: 0.0,
        }
    }
}

impl InferenceParams {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(EvalError::InvalidParameter {
                name: "batch_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.sample_count == 0 {
            return Err(EvalError::InvalidParameter {
                name: "sample_count",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(self.dropout_retention > 0.0 && self.dropout_retention <= 1.0) {
            return Err(EvalError::InvalidParameter {
                name: "dropout_retention",
                reason: format!("{} is outside (0, 1]", self.dropout_retention),
            });
        }
        if !(self.corruption_level >= 0.0 && self.corruption_level.is_finite()) {
            return Err(EvalError::InvalidParameter {
                name: "corruption_level",
                reason: format!("{} is not a finite non-negative level", self.corruption_level),
            });
        }
        Ok(())
    }
}

/// Classifier output for one dataset pattern
#[derive(Debug, Clone)]
pub struct EvaluationBatch {
    labels: Vec<usize>,
    probs: Array2<f64>,
    logits: Array2<f64>,
}

impl EvaluationBatch {
    pub fn new(labels: Vec<usize>, probs: Array2<f64>, logits: Array2<f64>) -> Result<Self> {
        if probs.nrows() != labels.len() {
            return Err(EvalError::Shape(format!(
                "{} labels but {} probability rows",
                labels.len(),
                probs.nrows()
            )));
        }
        if probs.dim() != logits.dim() {
            return Err(EvalError::Shape(format!(
                "probabilities are {:?} but logits are {:?}",
                probs.dim(),
                logits.dim()
            )));
        }
        Ok(Self {
            labels,
            probs,
            logits,
        })
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn probs(&self) -> ArrayView2<'_, f64> {
        self.probs.view()
    }

    pub fn logits(&self) -> ArrayView2<'_, f64> {
        self.logits.view()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_classes(&self) -> usize {
        self.probs.ncols()
    }

    /// Arg-max class per row
    pub fn predictions(&self) -> Vec<usize> {
        argmax_rows(self.probs.view())
    }

    /// Dirichlet concentration parameters, `exp(logits)`
    pub fn alphas(&self) -> Array2<f64> {
        self.logits.mapv(f64::exp)
    }

    /// Mean and population standard deviation over every logit
    pub fn logit_stats(&self) -> (f64, f64) {
        let mean = self.logits.mean().unwrap_or(0.0);
        let std = self.logits.std(0.0);
        (mean, std)
    }
}

/// Run the classifier over one dataset pattern
pub fn evaluate_domain(
    classifier: &dyn Classifier,
    pattern: &Path,
    params: &InferenceParams,
    domain: Domain,
) -> Result<EvaluationBatch> {
    params.validate()?;
    tracing::info!(
        "Evaluating {} pattern {} with {} (batch={}, samples={}, retention={}, corruption={})",
        domain,
        pattern.display(),
        classifier.name(),
        params.batch_size,
        params.sample_count,
        params.dropout_retention,
        params.corruption_level
    );

    let batch = classifier.evaluate(pattern, params)?;
    tracing::info!("{} evaluation produced {} examples over {} classes", domain, batch.len(), batch.n_classes());
    Ok(batch)
}

/// Require both evaluations to carry identical ground truth, element-wise
pub fn check_alignment(in_batch: &EvaluationBatch, out_batch: &EvaluationBatch) -> Result<()> {
    if in_batch.len() != out_batch.len() {
        return Err(EvalError::Alignment {
            detail: format!(
                "in-domain has {} examples, out-domain has {}",
                in_batch.len(),
                out_batch.len()
            ),
        });
    }

    if let Some((idx, (a, b))) = in_batch
        .labels()
        .iter()
        .zip(out_batch.labels())
        .enumerate()
        .find(|(_, (a, b))| a != b)
    {
        return Err(EvalError::Alignment {
            detail: format!("example {} is class {} in-domain but class {} out-domain", idx, a, b),
        });
    }

    if in_batch.n_classes() != out_batch.n_classes() {
        return Err(EvalError::Alignment {
            detail: format!(
                "in-domain scores {} classes, out-domain scores {}",
                in_batch.n_classes(),
                out_batch.n_classes()
            ),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn batch(labels: Vec<usize>) -> EvaluationBatch {
        let n = labels.len();
        let probs = Array2::from_elem((n, 2), 0.5);
        let logits = Array2::zeros((n, 2));
        EvaluationBatch::new(labels, probs, logits).unwrap()
    }

    #[test]
    fn test_alignment_accepts_identical_labels() {
        assert!(check_alignment(&batch(vec![0, 1, 1]), &batch(vec![0, 1, 1])).is_ok());
    }

    #[test]
    fn test_alignment_rejects_length_mismatch() {
        let result = check_alignment(&batch(vec![0, 1, 1]), &batch(vec![0, 1]));
        assert!(matches!(result, Err(EvalError::Alignment { .. })));
    }

    #[test]
    fn test_alignment_rejects_content_mismatch() {
        let result = check_alignment(&batch(vec![0, 1, 1]), &batch(vec![0, 0, 1]));
        match result {
            Err(EvalError::Alignment { detail }) => assert!(detail.contains("example 1")),
            other => panic!("expected alignment error, got {:?}", other),
        }
    }

    #[test]
    fn test_batch_shape_validation() {
        let result = EvaluationBatch::new(vec![0], Array2::zeros((2, 3)), Array2::zeros((2, 3)));
        assert!(matches!(result, Err(EvalError::Shape(_))));

        let result = EvaluationBatch::new(vec![0, 1], Array2::zeros((2, 3)), Array2::zeros((2, 2)));
        assert!(matches!(result, Err(EvalError::Shape(_))));
    }

    #[test]
    fn test_alphas_are_exp_logits() {
        let b = EvaluationBatch::new(
            vec![0],
            array![[0.5, 0.5]],
            array![[0.0, 1.0]],
        )
        .unwrap();
        let alphas = b.alphas();
        assert!((alphas[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((alphas[[0, 1]] - std::f64::consts::E).abs() < 1e-12);
    }

    #[test]
    fn test_params_validation() {
        assert!(InferenceParams::default().validate().is_ok());

        let bad = InferenceParams {
            dropout_retention: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(EvalError::InvalidParameter { name: "dropout_retention", .. })
        ));

        let bad = InferenceParams {
            corruption_level: -0.1,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
