// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation metrics
//!
//! Implements:
//! - ROC curve over every distinct threshold, with AUC by the trapezoidal rule
//! - Average precision (area under the precision-recall curve)
//! - Classification accuracy

use crate::error::{EvalError, Result};
use serde::{Deserialize, Serialize};

/// Receiver operating characteristic for a binary scoring problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocCurve {
    /// False positive rate per threshold, starting at 0
    pub fpr: Vec<f64>,
    /// True positive rate per threshold, starting at 0
    pub tpr: Vec<f64>,
    /// Score threshold per point; the first is `+inf`
    pub thresholds: Vec<f64>,
    pub auc: f64,
    /// Number of positive examples
    pub n_positive: usize,
    /// Number of negative examples
    pub n_negative: usize,
}

impl RocCurve {
    /// Build the curve where higher `scores` mean "more positive"
    ///
    /// Examples sharing a score enter the curve together, so tied scores
    /// contribute a diagonal segment rather than an order-dependent staircase.
    pub fn compute(positives: &[bool], scores: &[f64]) -> Result<Self> {
        let pairs = sorted_pairs(positives, scores)?;
        let n_positive = positives.iter().filter(|p| **p).count();
        let n_negative = positives.len() - n_positive;

        let mut fpr = vec![0.0];
        let mut tpr = vec![0.0];
        let mut thresholds = vec![f64::INFINITY];
        let mut tp = 0usize;
        let mut fp = 0usize;
        let mut auc = 0.0;

        let mut idx = 0;
        while idx < pairs.len() {
            let threshold = pairs[idx].1;
            while idx < pairs.len() && pairs[idx].1 == threshold {
                if pairs[idx].0 {
                    tp += 1;
                } else {
                    fp += 1;
                }
                idx += 1;
            }

            let tpr_now = tp as f64 / n_positive as f64;
            let fpr_now = fp as f64 / n_negative as f64;

            // Trapezoidal rule
            auc += (fpr_now - fpr[fpr.len() - 1]) * (tpr_now + tpr[tpr.len() - 1]) / 2.0;

            fpr.push(fpr_now);
            tpr.push(tpr_now);
            thresholds.push(threshold);
        }

        Ok(Self {
            fpr,
            tpr,
            thresholds,
            auc,
            n_positive,
            n_negative,
        })
    }
}

/// Area under the precision-recall curve, higher `scores` meaning "more positive"
pub fn average_precision(positives: &[bool], scores: &[f64]) -> Result<f64> {
    let pairs = sorted_pairs(positives, scores)?;
    let n_positive = positives.iter().filter(|p| **p).count() as f64;

    let mut tp = 0.0;
    let mut fp = 0.0;
    let mut ap = 0.0;
    let mut prev_recall = 0.0;

    let mut idx = 0;
    while idx < pairs.len() {
        let threshold = pairs[idx].1;
        while idx < pairs.len() && pairs[idx].1 == threshold {
            if pairs[idx].0 {
                tp += 1.0;
            } else {
                fp += 1.0;
            }
            idx += 1;
        }

        let precision = tp / (tp + fp);
        let recall = tp / n_positive;
        ap += precision * (recall - prev_recall);
        prev_recall = recall;
    }

    Ok(ap)
}

/// Fraction of predictions equal to the ground truth
pub fn accuracy(ground_truth: &[usize], predictions: &[usize]) -> Result<f64> {
    if ground_truth.len() != predictions.len() {
        return Err(EvalError::Shape(format!(
            "{} labels but {} predictions",
            ground_truth.len(),
            predictions.len()
        )));
    }
    if ground_truth.is_empty() {
        return Ok(0.0);
    }
    let correct = ground_truth.iter().zip(predictions).filter(|(t, p)| t == p).count();
    Ok(correct as f64 / ground_truth.len() as f64)
}

/// Pair labels with scores, sorted by score descending
fn sorted_pairs(positives: &[bool], scores: &[f64]) -> Result<Vec<(bool, f64)>> {
    if positives.len() != scores.len() {
        return Err(EvalError::Shape(format!(
            "{} labels but {} scores",
            positives.len(),
            scores.len()
        )));
    }
    if let Some(idx) = scores.iter().position(|s| s.is_nan()) {
        return Err(EvalError::InvalidParameter {
            name: "scores",
            reason: format!("score {} is NaN", idx),
        });
    }

    let n_positive = positives.iter().filter(|p| **p).count();
    if n_positive == 0 || n_positive == positives.len() {
        return Err(EvalError::InvalidParameter {
            name: "labels",
            reason: "both classes must be present".to_string(),
        });
    }

    let mut pairs: Vec<(bool, f64)> = positives.iter().copied().zip(scores.iter().copied()).collect();
    pairs.sort_by(|a, b| b.1.total_cmp(&a.1));
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auc_roc_perfect() {
        let positives = vec![true, true, false, false];
        let scores = vec![0.9, 0.8, 0.2, 0.1];

        let roc = RocCurve::compute(&positives, &scores).unwrap();
        assert!((roc.auc - 1.0).abs() < 1e-12);
        assert_eq!(roc.fpr.first(), Some(&0.0));
        assert_eq!(roc.tpr.last(), Some(&1.0));
        assert_eq!(roc.fpr.last(), Some(&1.0));
    }

    #[test]
    fn test_auc_roc_inverted() {
        let positives = vec![true, true, false, false];
        let scores = vec![0.1, 0.2, 0.8, 0.9];

        let roc = RocCurve::compute(&positives, &scores).unwrap();
        assert!(roc.auc.abs() < 1e-12);
    }

    #[test]
    fn test_auc_roc_all_tied_is_half() {
        let positives = vec![true, false, true, false, true, false];
        let scores = vec![0.5; 6];

        let roc = RocCurve::compute(&positives, &scores).unwrap();
        assert!((roc.auc - 0.5).abs() < 1e-12);
        // Start point plus a single threshold
        assert_eq!(roc.thresholds.len(), 2);
    }

    #[test]
    fn test_auc_roc_matches_pairwise_ranking() {
        // 3 of 9 positive/negative pairs ranked correctly plus one tie
        let positives = vec![true, false, true, false, true, false];
        let scores = vec![0.3, 0.7, 0.6, 0.4, 0.5, 0.5];

        let roc = RocCurve::compute(&positives, &scores).unwrap();
        assert!((roc.auc - 3.5 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_auc_roc_requires_both_classes() {
        let result = RocCurve::compute(&[true, true], &[0.1, 0.2]);
        assert!(matches!(result, Err(EvalError::InvalidParameter { name: "labels", .. })));
    }

    #[test]
    fn test_auc_roc_length_mismatch() {
        let result = RocCurve::compute(&[true, false], &[0.1]);
        assert!(matches!(result, Err(EvalError::Shape(_))));
    }

    #[test]
    fn test_average_precision_perfect() {
        let positives = vec![true, true, false, false];
        let scores = vec![0.9, 0.8, 0.2, 0.1];
        let ap = average_precision(&positives, &scores).unwrap();
        assert!((ap - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_average_precision_all_tied_is_prevalence() {
        let positives = vec![true, false, false, false];
        let ap = average_precision(&positives, &[1.0; 4]).unwrap();
        assert!((ap - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy() {
        assert!((accuracy(&[0, 1, 2, 1], &[0, 1, 1, 1]).unwrap() - 0.75).abs() < 1e-12);
        assert!(accuracy(&[0, 1], &[0]).is_err());
    }
}
