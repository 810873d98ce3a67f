// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Error taxonomy for the adversarial evaluation pipeline
//!
//! Every variant is fatal for the run that raised it: aggregate metrics
//! computed over misaligned or corrupted rows are meaningless, so nothing
//! downstream attempts partial recovery.

use std::path::PathBuf;

/// Which half of a paired evaluation a row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Domain {
    /// Clean, unperturbed inputs
    In,
    /// Adversarially perturbed counterparts
    Out,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Domain::In => write!(f, "in-domain"),
            Domain::Out => write!(f, "out-domain"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EvalError {
    /// In-domain and out-domain ground truth disagree
    #[error("label alignment failed: {detail}")]
    Alignment { detail: String },

    /// A probability or concentration row cannot support the computation
    #[error("degenerate {domain} input at row {row}: {reason}")]
    DegenerateInput {
        domain: Domain,
        row: usize,
        reason: String,
    },

    /// Output directory already holds results and overwrite was not requested
    #[error("output directory {} already holds results (pass --overwrite to replace them)", path.display())]
    OutputConflict { path: PathBuf },

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    /// Array dimensions that must agree do not
    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("dataset error in {}: {reason}", path.display())]
    Dataset { path: PathBuf, reason: String },

    #[error("checkpoint error in {}: {reason}", path.display())]
    Checkpoint { path: PathBuf, reason: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EvalError {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EvalError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_message_names_row_and_domain() {
        let err = EvalError::DegenerateInput {
            domain: Domain::Out,
            row: 7,
            reason: "zero probability".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("out-domain"));
        assert!(msg.contains("row 7"));
    }

    #[test]
    fn test_output_conflict_mentions_path() {
        let err = EvalError::OutputConflict {
            path: PathBuf::from("/tmp/run1"),
        };
        assert!(err.to_string().contains("/tmp/run1"));
    }
}
