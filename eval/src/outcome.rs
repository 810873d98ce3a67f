// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Attack outcome classification
//!
//! An attack "flips" an example when the perturbed prediction lands on the
//! target class chosen from the clean model's own ranking: either the
//! least-likely class or the runner-up class. Independently of the target,
//! `class_changed` records any change of prediction.
//!
//! Arg-max and arg-min keep the lowest index on ties. The runner-up is the
//! second-from-last entry of a stable ascending sort, so among tied classes
//! the higher index ranks above the lower one. Near-uniform probability rows
//! make attack success tie-sensitive, so both rules are covered by tests.

use crate::error::{EvalError, Result};
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Which target class counts as a successful attack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackObjective {
    /// Class the clean model ranks second
    #[default]
    RunnerUp,
    /// Class the clean model ranks last
    LeastLikely,
}

impl AttackObjective {
    pub fn from_least_likely(least_likely: bool) -> Self {
        if least_likely {
            AttackObjective::LeastLikely
        } else {
            AttackObjective::RunnerUp
        }
    }
}

/// Per-example attack outcome masks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeMasks {
    /// Target class reached
    pub flipped: Vec<bool>,
    /// Prediction differs from the clean prediction
    pub class_changed: Vec<bool>,
    /// Target class per example under the selected objective
    pub targets: Vec<usize>,
    pub objective: AttackObjective,
}

impl OutcomeMasks {
    pub fn len(&self) -> usize {
        self.flipped.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flipped.is_empty()
    }

    /// Fraction of examples whose attack reached its target class
    pub fn success_rate(&self) -> f64 {
        fraction(&self.flipped)
    }

    /// Fraction of examples whose predicted class changed at all
    pub fn change_rate(&self) -> f64 {
        fraction(&self.class_changed)
    }

    pub fn flipped_count(&self) -> usize {
        self.flipped.iter().filter(|f| **f).count()
    }
}

fn fraction(mask: &[bool]) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    mask.iter().filter(|m| **m).count() as f64 / mask.len() as f64
}

/// Class ids of one row in stable ascending order of probability
fn ascending_classes(row: ArrayView1<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..row.len()).collect();
    order.sort_by(|&a, &b| row[a].total_cmp(&row[b]));
    order
}

/// Arg-max per row, lowest index on ties
pub fn argmax_rows(probs: ArrayView2<f64>) -> Vec<usize> {
    probs
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |best, (idx, &v)| if v > best.1 { (idx, v) } else { best })
                .0
        })
        .collect()
}

/// Arg-min per row, lowest index on ties
pub fn argmin_rows(probs: ArrayView2<f64>) -> Vec<usize> {
    probs
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .fold((0, f64::INFINITY), |best, (idx, &v)| if v < best.1 { (idx, v) } else { best })
                .0
        })
        .collect()
}

/// Second-from-last class of the stable ascending order per row
///
/// With a single class the only class is returned. When the top two
/// probabilities tie, the runner-up is the lower index, which is also the
/// arg-max.
pub fn runner_up_rows(probs: ArrayView2<f64>) -> Vec<usize> {
    probs
        .rows()
        .into_iter()
        .map(|row| {
            let order = ascending_classes(row);
            order
                .len()
                .checked_sub(2)
                .and_then(|idx| order.get(idx))
                .or_else(|| order.first())
                .copied()
                .unwrap_or(0)
        })
        .collect()
}

/// Compare clean and perturbed predictions under the selected objective
pub fn classify_outcomes(
    in_probs: ArrayView2<f64>,
    in_preds: &[usize],
    out_preds: &[usize],
    objective: AttackObjective,
) -> Result<OutcomeMasks> {
    let n = in_probs.nrows();
    if in_preds.len() != n || out_preds.len() != n {
        return Err(EvalError::Shape(format!(
            "{} probability rows but {} clean and {} perturbed predictions",
            n,
            in_preds.len(),
            out_preds.len()
        )));
    }

    let targets = match objective {
        AttackObjective::LeastLikely => argmin_rows(in_probs),
        AttackObjective::RunnerUp => runner_up_rows(in_probs),
    };

    let flipped = out_preds.iter().zip(&targets).map(|(out, target)| out == target).collect();
    let class_changed = out_preds.iter().zip(in_preds).map(|(out, clean)| out != clean).collect();

    Ok(OutcomeMasks {
        flipped,
        class_changed,
        targets,
        objective,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn scenario_probs() -> Array2<f64> {
        array![
            [0.7, 0.2, 0.1],
            [0.1, 0.8, 0.1],
            [0.34, 0.33, 0.33],
            [0.5, 0.3, 0.2]
        ]
    }

    #[test]
    fn test_runner_up_ties_follow_stable_ascending_sort() {
        let probs = scenario_probs();
        // Tied classes keep index order when sorted ascending, so the higher index ranks second
        assert_eq!(runner_up_rows(probs.view()), vec![1, 2, 2, 1]);
    }

    #[test]
    fn test_runner_up_equals_argmax_when_top_two_tie() {
        let probs = array![[0.45, 0.45, 0.1], [0.2, 0.4, 0.4]];
        assert_eq!(argmax_rows(probs.view()), vec![0, 1]);
        assert_eq!(runner_up_rows(probs.view()), vec![0, 1]);
    }

    #[test]
    fn test_argmax_argmin_tie_breaking() {
        let probs = array![[0.25, 0.25, 0.25, 0.25], [0.1, 0.45, 0.45, 0.0]];
        assert_eq!(argmax_rows(probs.view()), vec![0, 1]);
        assert_eq!(argmin_rows(probs.view()), vec![0, 3]);
        assert_eq!(runner_up_rows(probs.view()), vec![2, 1]);
    }

    #[test]
    fn test_runner_up_single_class() {
        let probs = array![[1.0], [1.0]];
        assert_eq!(runner_up_rows(probs.view()), vec![0, 0]);
    }

    #[test]
    fn test_runner_up_scenario() {
        let probs = scenario_probs();
        let in_preds = argmax_rows(probs.view());
        let out_preds = [1, 0, 2, 1];

        let masks = classify_outcomes(probs.view(), &in_preds, &out_preds, AttackObjective::RunnerUp).unwrap();

        // Row 1 ties classes 0 and 2 below the top class; class 2 ranks second.
        // Row 2 ties classes 1 and 2; class 2 ranks second, so predicting 2 is a flip.
        assert_eq!(masks.targets, vec![1, 2, 2, 1]);
        assert_eq!(masks.flipped, vec![true, false, true, true]);
        assert_eq!(masks.class_changed, vec![true, true, true, true]);
        assert!((masks.success_rate() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_least_likely_scenario() {
        let probs = scenario_probs();
        let in_preds = argmax_rows(probs.view());
        let out_preds = [2, 0, 1, 1];

        let masks = classify_outcomes(probs.view(), &in_preds, &out_preds, AttackObjective::LeastLikely).unwrap();

        assert_eq!(masks.targets, vec![2, 0, 1, 2]);
        assert_eq!(masks.flipped, vec![true, true, true, false]);
        assert_eq!(masks.flipped_count(), 3);
    }

    #[test]
    fn test_flip_only_counts_selected_objective() {
        // Runner-up is class 1, least likely is class 2
        let probs = array![[0.6, 0.3, 0.1]];
        let in_preds = [0];

        let runner_up = classify_outcomes(probs.view(), &in_preds, &[2], AttackObjective::RunnerUp).unwrap();
        assert_eq!(runner_up.flipped, vec![false]);
        assert_eq!(runner_up.class_changed, vec![true]);

        let least = classify_outcomes(probs.view(), &in_preds, &[1], AttackObjective::LeastLikely).unwrap();
        assert_eq!(least.flipped, vec![false]);
        assert_eq!(least.class_changed, vec![true]);
    }

    #[test]
    fn test_class_changed_covers_unchanged_predictions() {
        let probs = array![[0.6, 0.4], [0.3, 0.7]];
        let in_preds = argmax_rows(probs.view());
        let masks = classify_outcomes(probs.view(), &in_preds, &[0, 0], AttackObjective::RunnerUp).unwrap();

        assert_eq!(masks.class_changed, vec![false, true]);
        assert!((masks.change_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let probs = scenario_probs();
        let result = classify_outcomes(probs.view(), &[0, 1], &[0, 1, 2, 0], AttackObjective::RunnerUp);
        assert!(matches!(result, Err(EvalError::Shape(_))));
    }

    #[test]
    fn test_objective_from_flag() {
        assert_eq!(AttackObjective::from_least_likely(true), AttackObjective::LeastLikely);
        assert_eq!(AttackObjective::from_least_likely(false), AttackObjective::RunnerUp);
    }
}
