// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Feed-forward networks restored from JSON checkpoints
//!
//! A checkpoint is a stack of layers. Dense and convolutional layers are
//! followed by a ReLU except for the final dense layer, whose outputs are the
//! pre-activation logits (the log-concentrations of the Dirichlet output).
//! Hidden dense activations pass through inverted dropout when the retention
//! probability is below one.

use crate::classifier::ModelType;
use crate::error::{EvalError, Result};
use ndarray::{s, Array1, Array2, Array3, Array4, ArrayView1};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A single layer of a checkpointed network
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Layer {
    /// Fully connected layer, `weights` is `inputs × outputs`
    Dense { weights: Array2<f64>, bias: Array1<f64> },
    /// Valid 2-D convolution with stride 1, `kernels` is `out × in × kh × kw`
    Conv2d { kernels: Array4<f64>, bias: Array1<f64> },
    /// Non-overlapping max pooling over `size × size` windows
    MaxPool2d { size: usize },
}

/// Serialized network weights plus the architecture they belong to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub architecture: ModelType,
    /// `[channels, height, width]` for convolutional inputs
    #[serde(default)]
    pub input_shape: Option<[usize; 3]>,
    pub layers: Vec<Layer>,
}

impl Checkpoint {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
        let checkpoint: Checkpoint = serde_json::from_str(&json).map_err(|e| EvalError::Checkpoint {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        tracing::info!(
            "Restored {:?} checkpoint with {} layers from {}",
            checkpoint.architecture,
            checkpoint.layers.len(),
            path.display()
        );
        Ok(checkpoint)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| EvalError::io(path, e))
    }
}

/// Shape of an activation between layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Flat(usize),
    Map(usize, usize, usize),
}

impl Shape {
    fn size(&self) -> usize {
        match *self {
            Shape::Flat(n) => n,
            Shape::Map(c, h, w) => c * h * w,
        }
    }
}

enum Activation {
    Flat(Array1<f64>),
    Map(Array3<f64>),
}

impl Activation {
    fn into_flat(self) -> Array1<f64> {
        match self {
            Activation::Flat(x) => x,
            Activation::Map(x) => x.iter().copied().collect(),
        }
    }
}

/// A validated layer stack ready for forward passes
#[derive(Debug, Clone)]
pub struct Network {
    input_shape: Option<(usize, usize, usize)>,
    layers: Vec<Layer>,
    n_inputs: usize,
    n_classes: usize,
}

impl Network {
    /// Check that consecutive layer shapes agree and that the stack ends in logits
    pub fn new(input_shape: Option<[usize; 3]>, layers: Vec<Layer>) -> Result<Self> {
        let mut shape = match input_shape {
            Some([c, h, w]) => Shape::Map(c, h, w),
            None => match layers.first() {
                Some(Layer::Dense { weights, .. }) => Shape::Flat(weights.nrows()),
                _ => {
                    return Err(EvalError::Shape(
                        "a network without an input shape must start with a dense layer".to_string(),
                    ))
                }
            },
        };
        let n_inputs = shape.size();

        for (idx, layer) in layers.iter().enumerate() {
            shape = match (layer, shape) {
                (Layer::Dense { weights, bias }, current) => {
                    if weights.nrows() != current.size() || weights.ncols() != bias.len() {
                        return Err(EvalError::Shape(format!(
                            "layer {}: dense {}x{} (bias {}) cannot follow an activation of size {}",
                            idx,
                            weights.nrows(),
                            weights.ncols(),
                            bias.len(),
                            current.size()
                        )));
                    }
                    Shape::Flat(weights.ncols())
                }
                (Layer::Conv2d { kernels, bias }, Shape::Map(c, h, w)) => {
                    let (out_c, in_c, kh, kw) = kernels.dim();
                    if in_c != c || out_c != bias.len() || kh == 0 || kw == 0 || kh > h || kw > w {
                        return Err(EvalError::Shape(format!(
                            "layer {}: conv kernels {:?} do not fit a {}x{}x{} input",
                            idx,
                            kernels.dim(),
                            c,
                            h,
                            w
                        )));
                    }
                    Shape::Map(out_c, h - kh + 1, w - kw + 1)
                }
                (Layer::MaxPool2d { size }, Shape::Map(c, h, w)) => {
                    if *size == 0 || *size > h || *size > w {
                        return Err(EvalError::Shape(format!(
                            "layer {}: pool size {} does not fit a {}x{} map",
                            idx, size, h, w
                        )));
                    }
                    Shape::Map(c, h / size, w / size)
                }
                (_, Shape::Flat(_)) => {
                    return Err(EvalError::Shape(format!(
                        "layer {}: spatial layer follows a flattened activation",
                        idx
                    )))
                }
            };
        }

        let n_classes = match (layers.last(), shape) {
            (Some(Layer::Dense { .. }), Shape::Flat(n)) if n >= 2 => n,
            _ => {
                return Err(EvalError::Shape(
                    "network must end in a dense layer with at least two outputs".to_string(),
                ))
            }
        };

        tracing::debug!("Network validated: {} inputs, {} classes", n_inputs, n_classes);

        Ok(Self {
            input_shape: input_shape.map(|[c, h, w]| (c, h, w)),
            layers,
            n_inputs,
            n_classes,
        })
    }

    pub fn n_inputs(&self) -> usize {
        self.n_inputs
    }

    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    pub fn is_convolutional(&self) -> bool {
        self.input_shape.is_some()
    }

    /// One stochastic forward pass for a single example, returning logits
    pub fn forward<R: Rng + ?Sized>(
        &self,
        input: ArrayView1<f64>,
        retention: f64,
        rng: &mut R,
    ) -> Result<Array1<f64>> {
        if input.len() != self.n_inputs {
            return Err(EvalError::Shape(format!(
                "expected {} input features, got {}",
                self.n_inputs,
                input.len()
            )));
        }

        let mut activation = match self.input_shape {
            Some(shape) => Activation::Map(
                input
                    .to_owned()
                    .into_shape_with_order(shape)
                    .map_err(|e| EvalError::Shape(e.to_string()))?,
            ),
            None => Activation::Flat(input.to_owned()),
        };

        let last = self.layers.len() - 1;
        for (idx, layer) in self.layers.iter().enumerate() {
            activation = match (layer, activation) {
                (Layer::Dense { weights, bias }, current) => {
                    let mut z = current.into_flat().dot(weights) + bias;
                    if idx != last {
                        z.mapv_inplace(relu);
                        dropout(&mut z, retention, rng);
                    }
                    Activation::Flat(z)
                }
                (Layer::Conv2d { kernels, bias }, Activation::Map(x)) => {
                    let mut z = conv2d(&x, kernels, bias);
                    z.mapv_inplace(relu);
                    Activation::Map(z)
                }
                (Layer::MaxPool2d { size }, Activation::Map(x)) => Activation::Map(max_pool(&x, *size)),
                _ => {
                    return Err(EvalError::Shape(format!(
                        "layer {} received an activation of the wrong rank",
                        idx
                    )))
                }
            };
        }

        Ok(activation.into_flat())
    }
}

fn relu(v: f64) -> f64 {
    v.max(0.0)
}

/// Inverted dropout: survivors are scaled by `1 / retention`
fn dropout<R: Rng + ?Sized>(z: &mut Array1<f64>, retention: f64, rng: &mut R) {
    if retention >= 1.0 {
        return;
    }
    for v in z.iter_mut() {
        if rng.gen::<f64>() < retention {
            *v /= retention;
        } else {
            *v = 0.0;
        }
    }
}

fn conv2d(x: &Array3<f64>, kernels: &Array4<f64>, bias: &Array1<f64>) -> Array3<f64> {
    let (out_c, _, kh, kw) = kernels.dim();
    let (_, h, w) = x.dim();
    let (oh, ow) = (h - kh + 1, w - kw + 1);

    let mut out = Array3::zeros((out_c, oh, ow));
    for o in 0..out_c {
        let kernel = kernels.slice(s![o, .., .., ..]);
        for i in 0..oh {
            for j in 0..ow {
                let patch = x.slice(s![.., i..i + kh, j..j + kw]);
                out[[o, i, j]] = (&patch * &kernel).sum() + bias[o];
            }
        }
    }
    out
}

fn max_pool(x: &Array3<f64>, size: usize) -> Array3<f64> {
    let (c, h, w) = x.dim();
    let (oh, ow) = (h / size, w / size);

    let mut out = Array3::zeros((c, oh, ow));
    for ch in 0..c {
        for i in 0..oh {
            for j in 0..ow {
                out[[ch, i, j]] = x
                    .slice(s![ch, i * size..(i + 1) * size, j * size..(j + 1) * size])
                    .fold(f64::NEG_INFINITY, |m, &v| m.max(v));
            }
        }
    }
    out
}

/// Numerically stable softmax of one logit vector
pub fn softmax(logits: ArrayView1<f64>) -> Array1<f64> {
    let max = logits.fold(f64::NEG_INFINITY, |m, &v| m.max(v));
    let exp = logits.mapv(|v| (v - max).exp());
    let total = exp.sum();
    exp / total
}

/// Draw from N(0, 1) with the Box-Muller transform
pub(crate) fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
