// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Classifier capability and its architecture variants
//!
//! Implements:
//! - `MlpClassifier` (dense layer stack over flat feature vectors)
//! - `ConvClassifier` (convolution and pooling over `[channels, height, width]`
//!   inputs, followed by a dense head)
//!
//! Callers of the harness depend only on the `Classifier` trait; the variant
//! is picked from a `ModelType` when the checkpoint is restored.

use crate::datasets::Dataset;
use crate::error::{EvalError, Result};
use crate::harness::{EvaluationBatch, InferenceParams};
use crate::network::{softmax, standard_normal, Checkpoint, Network};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Architecture selector for restored checkpoints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Mlp,
    Conv,
}

/// Trait for every evaluable classifier
pub trait Classifier {
    /// Evaluate every example matched by `pattern`, returning ground truth,
    /// averaged class probabilities and averaged logits
    fn evaluate(&self, pattern: &Path, params: &InferenceParams) -> Result<EvaluationBatch>;

    /// Get model name
    fn name(&self) -> &str;
}

/// Dense prior network over flat feature vectors
#[derive(Debug, Clone)]
pub struct MlpClassifier {
    network: Network,
    seed: u64,
}

impl MlpClassifier {
    pub fn new(network: Network, seed: u64) -> Result<Self> {
        if network.is_convolutional() {
            return Err(EvalError::Shape(
                "an MLP classifier cannot take a spatial input shape".to_string(),
            ));
        }
        Ok(Self { network, seed })
    }
}

impl Classifier for MlpClassifier {
    fn evaluate(&self, pattern: &Path, params: &InferenceParams) -> Result<EvaluationBatch> {
        run_inference(&self.network, pattern, params, self.seed)
    }

    fn name(&self) -> &str {
        "MLP"
    }
}

/// Convolutional prior network over `[channels, height, width]` inputs
#[derive(Debug, Clone)]
pub struct ConvClassifier {
    network: Network,
    seed: u64,
}

impl ConvClassifier {
    pub fn new(network: Network, seed: u64) -> Result<Self> {
        if !network.is_convolutional() {
            return Err(EvalError::Shape(
                "a convolutional classifier needs an input shape".to_string(),
            ));
        }
        Ok(Self { network, seed })
    }
}

impl Classifier for ConvClassifier {
    fn evaluate(&self, pattern: &Path, params: &InferenceParams) -> Result<EvaluationBatch> {
        run_inference(&self.network, pattern, params, self.seed)
    }

    fn name(&self) -> &str {
        "CONV"
    }
}

/// Restore a checkpoint and wrap it in the variant named by `model_type`
pub fn load_classifier(model_type: ModelType, checkpoint_path: &Path, seed: u64) -> Result<Box<dyn Classifier>> {
    let checkpoint = Checkpoint::load(checkpoint_path)?;
    if checkpoint.architecture != model_type {
        return Err(EvalError::Checkpoint {
            path: checkpoint_path.to_path_buf(),
            reason: format!(
                "checkpoint holds a {:?} network but {:?} was requested",
                checkpoint.architecture, model_type
            ),
        });
    }

    let network = Network::new(checkpoint.input_shape, checkpoint.layers)?;
    let classifier: Box<dyn Classifier> = match model_type {
        ModelType::Mlp => Box::new(MlpClassifier::new(network, seed)?),
        ModelType::Conv => Box::new(ConvClassifier::new(network, seed)?),
    };
    Ok(classifier)
}

/// Batched Monte-Carlo inference shared by every network variant
fn run_inference(network: &Network, pattern: &Path, params: &InferenceParams, seed: u64) -> Result<EvaluationBatch> {
    params.validate()?;
    let dataset = Dataset::load(pattern)?;
    if dataset.n_features() != network.n_inputs() {
        return Err(EvalError::Dataset {
            path: pattern.to_path_buf(),
            reason: format!(
                "examples have {} features but the network expects {}",
                dataset.n_features(),
                network.n_inputs()
            ),
        });
    }

    let n_classes = network.n_classes();
    let distribution = dataset.class_distribution();
    if let Some(&max_label) = distribution.keys().next_back() {
        if max_label >= n_classes {
            return Err(EvalError::Dataset {
                path: pattern.to_path_buf(),
                reason: format!("label {} is outside the network's {} classes", max_label, n_classes),
            });
        }
    }
    tracing::debug!("Class distribution of {}: {:?}", pattern.display(), distribution);

    let n = dataset.len();
    let mut probs = Array2::zeros((n, n_classes));
    let mut logits = Array2::zeros((n, n_classes));
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let passes = params.sample_count as f64;

    for start in (0..n).step_by(params.batch_size) {
        let end = (start + params.batch_size).min(n);
        tracing::debug!("Inference batch {}..{} of {}", start, end, n);

        for row in start..end {
            let clean = dataset.features.row(row);
            let input = if params.corruption_level > 0.0 {
                clean.mapv(|v| v + params.corruption_level * standard_normal(&mut rng))
            } else {
                clean.to_owned()
            };

            let mut prob_sum = Array1::<f64>::zeros(n_classes);
            let mut logit_sum = Array1::<f64>::zeros(n_classes);
            for _ in 0..params.sample_count {
                let z = network.forward(input.view(), params.dropout_retention, &mut rng)?;
                prob_sum += &softmax(z.view());
                logit_sum += &z;
            }

            probs.row_mut(row).assign(&(prob_sum / passes));
            logits.row_mut(row).assign(&(logit_sum / passes));
        }
    }

    EvaluationBatch::new(dataset.labels, probs, logits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Layer;
    use ndarray::array;

    fn write_two_class_fixture(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
        let data = dir.join("data.csv");
        std::fs::write(&data, "0,2.0,0.0\n1,0.0,2.0\n1,0.5,1.5\n").unwrap();

        let checkpoint = Checkpoint {
            architecture: ModelType::Mlp,
            input_shape: None,
            layers: vec![Layer::Dense {
                weights: array![[1.0, -1.0], [-1.0, 1.0]],
                bias: array![0.0, 0.0],
            }],
        };
        let ckpt = dir.join("model.json");
        checkpoint.save(&ckpt).unwrap();
        (data, ckpt)
    }

    #[test]
    fn test_mlp_evaluate_fixture() {
        let dir = tempfile::tempdir().unwrap();
        let (data, ckpt) = write_two_class_fixture(dir.path());

        let classifier = load_classifier(ModelType::Mlp, &ckpt, 42).unwrap();
        let batch = classifier.evaluate(&data, &InferenceParams::default()).unwrap();

        assert_eq!(batch.labels(), &[0, 1, 1]);
        assert_eq!(batch.predictions(), vec![0, 1, 1]);
        for row in batch.probs().rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
        assert!((batch.logits()[[0, 0]] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_architecture_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_, ckpt) = write_two_class_fixture(dir.path());

        let result = load_classifier(ModelType::Conv, &ckpt, 42);
        assert!(matches!(result, Err(EvalError::Checkpoint { .. })));
    }

    #[test]
    fn test_feature_width_mismatch_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_, ckpt) = write_two_class_fixture(dir.path());
        let wide = dir.path().join("wide.csv");
        std::fs::write(&wide, "0,1.0,2.0,3.0\n").unwrap();

        let classifier = load_classifier(ModelType::Mlp, &ckpt, 42).unwrap();
        let result = classifier.evaluate(&wide, &InferenceParams::default());
        assert!(matches!(result, Err(EvalError::Dataset { .. })));
    }

    #[test]
    fn test_label_outside_class_range_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_, ckpt) = write_two_class_fixture(dir.path());
        let data = dir.path().join("three_class.csv");
        std::fs::write(&data, "0,1.0,0.0\n2,0.0,1.0\n").unwrap();

        let classifier = load_classifier(ModelType::Mlp, &ckpt, 42).unwrap();
        match classifier.evaluate(&data, &InferenceParams::default()) {
            Err(EvalError::Dataset { reason, .. }) => assert!(reason.contains("label 2")),
            other => panic!("expected dataset error, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_corruption_is_reproducible() {
        let dir = tempfile::tempdir().unwrap();
        let (data, ckpt) = write_two_class_fixture(dir.path());
        let params = InferenceParams {
            corruption_level: 0.3,
            sample_count: 4,
            ..Default::default()
        };

        let classifier = load_classifier(ModelType::Mlp, &ckpt, 9).unwrap();
        let a = classifier.evaluate(&data, &params).unwrap();
        let b = classifier.evaluate(&data, &params).unwrap();
        assert_eq!(a.logits(), b.logits());
    }
}
