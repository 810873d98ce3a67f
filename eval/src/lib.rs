// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Adversarial evaluation for Dirichlet Prior Network classifiers
//!
//! This crate provides:
//! - Dataset loading from CSV files, directories and file-name globs
//! - MLP and convolutional classifiers restored from JSON checkpoints
//! - Attack outcome masks (runner-up and least-likely objectives)
//! - Dirichlet uncertainty measures (total, data, mutual information, ...)
//! - Domain separation analysis (ROC/AUC, average precision)
//! - Flat-file persistence and curve data rendering
//! - A seeded, reproducible end-to-end pipeline

pub mod classifier;
pub mod datasets;
pub mod error;
pub mod harness;
pub mod metrics;
pub mod network;
pub mod outcome;
pub mod pipeline;
pub mod render;
pub mod separation;
pub mod special;
pub mod uncertainty;
pub mod writer;

pub use classifier::{load_classifier, Classifier, ConvClassifier, MlpClassifier, ModelType};
pub use datasets::Dataset;
pub use error::{Domain, EvalError, Result};
pub use harness::{check_alignment, evaluate_domain, EvaluationBatch, InferenceParams};
pub use metrics::RocCurve;
pub use outcome::{classify_outcomes, AttackObjective, OutcomeMasks};
pub use pipeline::{AdversarialEvalConfig, AdversarialEvalResults, AdversarialPipeline};
pub use render::{CurveDataRenderer, RenderOptions, Renderer};
pub use separation::{analyze, SeparationReport};
pub use uncertainty::{compute_uncertainties, Measure, UncertaintyCalculator, UncertaintyMeasures};
pub use writer::ResultWriter;
