// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dirichlet-derived uncertainty measures
//!
//! For a row with expected categorical `p` and concentrations `α`
//! (`α0 = Σ α_c`):
//! - total uncertainty: `H[p] = -Σ p_c ln p_c`
//! - data uncertainty: `E[H] = -Σ (α_c/α0) (ψ(α_c + 1) - ψ(α0 + 1))`
//! - mutual information (knowledge uncertainty): `H[p] - E[H]`
//! - EPKL: `(C - 1) / α0`
//! - differential entropy of `Dir(α)`
//! - confidence: `-max p`
//!
//! Every measure grows with uncertainty, so in-domain examples are expected
//! to score lower than out-domain ones. Rows are independent.

use crate::error::{Domain, EvalError, Result};
use crate::special::{digamma, ln_gamma};
use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named uncertainty measure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Confidence,
    TotalUncertainty,
    DataUncertainty,
    MutualInformation,
    Epkl,
    DifferentialEntropy,
}

impl Measure {
    pub const ALL: [Measure; 6] = [
        Measure::Confidence,
        Measure::TotalUncertainty,
        Measure::DataUncertainty,
        Measure::MutualInformation,
        Measure::Epkl,
        Measure::DifferentialEntropy,
    ];

    /// Stable identifier used in file names
    pub fn key(&self) -> &'static str {
        match self {
            Measure::Confidence => "confidence",
            Measure::TotalUncertainty => "total_uncertainty",
            Measure::DataUncertainty => "data_uncertainty",
            Measure::MutualInformation => "mutual_information",
            Measure::Epkl => "epkl",
            Measure::DifferentialEntropy => "differential_entropy",
        }
    }

    /// Human-readable title for figures and reports
    pub fn title(&self) -> &'static str {
        match self {
            Measure::Confidence => "Negative Max Probability",
            Measure::TotalUncertainty => "Total Uncertainty (Entropy of Expected)",
            Measure::DataUncertainty => "Expected Data Uncertainty",
            Measure::MutualInformation => "Mutual Information",
            Measure::Epkl => "Expected Pairwise KL",
            Measure::DifferentialEntropy => "Differential Entropy",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.key() == key)
    }
}

impl std::fmt::Display for Measure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Per-example values of every measure for one domain
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UncertaintyMeasures {
    values: BTreeMap<Measure, Vec<f64>>,
}

impl UncertaintyMeasures {
    pub fn get(&self, measure: Measure) -> Option<&[f64]> {
        self.values.get(&measure).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Measure, &[f64])> {
        self.values.iter().map(|(m, v)| (*m, v.as_slice()))
    }

    pub fn measures(&self) -> impl Iterator<Item = Measure> + '_ {
        self.values.keys().copied()
    }

    /// Number of examples
    pub fn len(&self) -> usize {
        self.values.values().next().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turns probabilities and concentrations into uncertainty measures
#[derive(Debug, Clone, Default)]
pub struct UncertaintyCalculator {
    log_epsilon: Option<f64>,
}

impl UncertaintyCalculator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard `ln p` as `ln(p + epsilon)` so zero probabilities are accepted
    pub fn with_log_epsilon(mut self, epsilon: f64) -> Self {
        self.log_epsilon = Some(epsilon);
        self
    }

    pub fn compute(&self, domain: Domain, probs: ArrayView2<f64>, alphas: ArrayView2<f64>) -> Result<UncertaintyMeasures> {
        if probs.dim() != alphas.dim() {
            return Err(EvalError::Shape(format!(
                "{} probabilities are {:?} but concentrations are {:?}",
                domain,
                probs.dim(),
                alphas.dim()
            )));
        }

        let n = probs.nrows();
        let mut values: BTreeMap<Measure, Vec<f64>> =
            Measure::ALL.iter().map(|m| (*m, Vec::with_capacity(n))).collect();

        for (row, (p, a)) in probs.rows().into_iter().zip(alphas.rows()).enumerate() {
            let scores = self.row_measures(p, a).map_err(|reason| EvalError::DegenerateInput {
                domain,
                row,
                reason,
            })?;
            for (measure, value) in scores {
                if let Some(column) = values.get_mut(&measure) {
                    column.push(value);
                }
            }
        }

        tracing::debug!("Computed {} uncertainty measures over {} {} rows", values.len(), n, domain);
        Ok(UncertaintyMeasures { values })
    }

    fn row_measures(
        &self,
        p: ArrayView1<f64>,
        alpha: ArrayView1<f64>,
    ) -> std::result::Result<[(Measure, f64); 6], String> {
        for (c, &v) in p.iter().enumerate() {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("probability {} for class {} is not a finite non-negative value", v, c));
            }
            if v == 0.0 && self.log_epsilon.is_none() {
                return Err(format!("zero probability for class {} would feed a logarithm", c));
            }
        }
        for (c, &v) in alpha.iter().enumerate() {
            if !v.is_finite() || v < f64::MIN_POSITIVE {
                return Err(format!("concentration {} for class {} is not a finite normal positive value", v, c));
            }
        }

        let alpha0: f64 = alpha.sum();
        if !alpha0.is_finite() {
            return Err("concentration sum overflows".to_string());
        }

        let eps = self.log_epsilon.unwrap_or(0.0);
        let n_classes = p.len() as f64;

        let total = -p.iter().map(|&v| v * (v + eps).ln()).sum::<f64>();

        let psi_alpha0_plus_one = digamma(alpha0 + 1.0);
        let data = -alpha
            .iter()
            .map(|&a| (a / alpha0) * (digamma(a + 1.0) - psi_alpha0_plus_one))
            .sum::<f64>();

        let psi_alpha0 = digamma(alpha0);
        let differential_entropy = alpha.iter().map(|&a| ln_gamma(a)).sum::<f64>()
            - ln_gamma(alpha0)
            - alpha.iter().map(|&a| (a - 1.0) * (digamma(a) - psi_alpha0)).sum::<f64>();

        let confidence = -p.fold(f64::NEG_INFINITY, |m, &v| m.max(v));

        let scores = [
            (Measure::Confidence, confidence),
            (Measure::TotalUncertainty, total),
            (Measure::DataUncertainty, data),
            (Measure::MutualInformation, total - data),
            (Measure::Epkl, (n_classes - 1.0) / alpha0),
            (Measure::DifferentialEntropy, differential_entropy),
        ];
        if let Some((measure, value)) = scores.iter().find(|(_, v)| !v.is_finite()) {
            return Err(format!("{} evaluates to {}", measure.key(), value));
        }
        Ok(scores)
    }
}

/// Compute every measure with the default (unguarded) calculator
pub fn compute_uncertainties(
    domain: Domain,
    probs: ArrayView2<f64>,
    alphas: ArrayView2<f64>,
) -> Result<UncertaintyMeasures> {
    UncertaintyCalculator::new().compute(domain, probs, alphas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    /// Probabilities consistent with the concentrations, as the classifier produces them
    fn consistent(alphas: &Array2<f64>) -> Array2<f64> {
        let mut probs = alphas.clone();
        for mut row in probs.rows_mut() {
            let total = row.sum();
            row /= total;
        }
        probs
    }

    #[test]
    fn test_flat_dirichlet_values() {
        let alphas = array![[1.0, 1.0]];
        let probs = consistent(&alphas);
        let m = compute_uncertainties(Domain::In, probs.view(), alphas.view()).unwrap();

        let total = m.get(Measure::TotalUncertainty).unwrap()[0];
        let data = m.get(Measure::DataUncertainty).unwrap()[0];
        assert!((total - 2.0_f64.ln()).abs() < 1e-10);
        // E[H] for Dir(1,1) is 1/2
        assert!((data - 0.5).abs() < 1e-10);
        assert!((m.get(Measure::Epkl).unwrap()[0] - 0.5).abs() < 1e-12);
        // Dir(1,1) is uniform on the simplex: differential entropy ln(1/Γ(2)) = 0
        assert!(m.get(Measure::DifferentialEntropy).unwrap()[0].abs() < 1e-10);
        assert!((m.get(Measure::Confidence).unwrap()[0] + 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_decomposition_identity() {
        let logits = array![
            [2.0, 0.1, -1.0],
            [-3.0, -3.0, -3.0],
            [8.0, -2.0, 0.5],
            [0.0, 0.0, 0.0],
            [5.0, 5.0, -4.0]
        ];
        let alphas = logits.mapv(f64::exp);
        let probs = consistent(&alphas);
        let m = compute_uncertainties(Domain::Out, probs.view(), alphas.view()).unwrap();

        let total = m.get(Measure::TotalUncertainty).unwrap();
        let data = m.get(Measure::DataUncertainty).unwrap();
        let mi = m.get(Measure::MutualInformation).unwrap();
        for i in 0..total.len() {
            assert!(total[i] + 1e-6 >= data[i], "row {}: {} < {}", i, total[i], data[i]);
            assert!(mi[i] >= -1e-6);
            assert!(total[i].is_finite() && data[i].is_finite());
        }
    }

    #[test]
    fn test_knowledge_uncertainty_shrinks_with_concentration() {
        let alphas = array![[0.5, 0.5, 0.5], [50.0, 50.0, 50.0]];
        let probs = consistent(&alphas);
        let m = compute_uncertainties(Domain::In, probs.view(), alphas.view()).unwrap();

        let mi = m.get(Measure::MutualInformation).unwrap();
        let total = m.get(Measure::TotalUncertainty).unwrap();
        // Same expected categorical, so total uncertainty matches
        assert!((total[0] - total[1]).abs() < 1e-12);
        assert!(mi[0] > mi[1]);
        assert!(m.get(Measure::Epkl).unwrap()[0] > m.get(Measure::Epkl).unwrap()[1]);
    }

    #[test]
    fn test_zero_probability_rejected_with_row_index() {
        let probs = array![[0.5, 0.5], [1.0, 0.0]];
        let alphas = array![[1.0, 1.0], [5.0, 1e-3]];
        let result = compute_uncertainties(Domain::Out, probs.view(), alphas.view());

        match result {
            Err(EvalError::DegenerateInput { domain, row, .. }) => {
                assert_eq!(domain, Domain::Out);
                assert_eq!(row, 1);
            }
            other => panic!("expected degenerate input, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_probability_accepted_with_epsilon_guard() {
        let probs = array![[1.0, 0.0]];
        let alphas = array![[5.0, 1e-3]];
        let m = UncertaintyCalculator::new()
            .with_log_epsilon(1e-10)
            .compute(Domain::In, probs.view(), alphas.view())
            .unwrap();

        assert!(m.iter().all(|(_, v)| v[0].is_finite()));
    }

    #[test]
    fn test_non_positive_alpha_rejected() {
        let probs = array![[0.5, 0.5]];
        let alphas = array![[1.0, 0.0]];
        let result = compute_uncertainties(Domain::In, probs.view(), alphas.view());
        assert!(matches!(result, Err(EvalError::DegenerateInput { row: 0, .. })));

        let alphas = array![[1.0, f64::INFINITY]];
        let result = compute_uncertainties(Domain::In, probs.view(), alphas.view());
        assert!(matches!(result, Err(EvalError::DegenerateInput { .. })));
    }

    #[test]
    fn test_subnormal_alpha_rejected() {
        // exp of a logit below about -708 underflows to a subnormal concentration
        let logits = array![[0.0, 0.0], [2.0, -740.0]];
        let alphas = logits.mapv(f64::exp);
        assert!(alphas[[1, 1]] > 0.0 && alphas[[1, 1]] < f64::MIN_POSITIVE);

        let probs = array![[0.5, 0.5], [0.9, 0.1]];
        let result = compute_uncertainties(Domain::In, probs.view(), alphas.view());
        match result {
            Err(EvalError::DegenerateInput { row, .. }) => assert_eq!(row, 1),
            other => panic!("expected degenerate input, got {:?}", other),
        }
    }

    #[test]
    fn test_every_measure_present_and_keyed() {
        let alphas = array![[2.0, 3.0], [1.0, 4.0]];
        let probs = consistent(&alphas);
        let m = compute_uncertainties(Domain::In, probs.view(), alphas.view()).unwrap();

        assert_eq!(m.len(), 2);
        assert_eq!(m.measures().count(), Measure::ALL.len());
        for measure in Measure::ALL {
            assert_eq!(Measure::from_key(measure.key()), Some(measure));
            assert_eq!(m.get(measure).map(<[f64]>::len), Some(2));
        }
    }
}
