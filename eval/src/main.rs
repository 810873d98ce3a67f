// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Adversarial evaluation CLI for Dirichlet Prior Network classifiers
//!
//! Usage:
//!   eval-adversarial data/test data/adv_fgsm_0.1 runs/fgsm mlp --load-path runs/model
//!   eval-adversarial data/test 'data/adv/*.csv' runs/ll conv --least-likely --overwrite

use anyhow::{Context, Result};
use clap::Parser;
use dpn_eval::classifier::{load_classifier, ModelType};
use dpn_eval::harness::InferenceParams;
use dpn_eval::outcome::AttackObjective;
use dpn_eval::pipeline::{AdversarialEvalConfig, AdversarialPipeline};
use dpn_eval::render::CurveDataRenderer;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

const COMMAND_LOG_DIR: &str = "CMDs";
const COMMAND_LOG_FILE: &str = "step_evaluate_adversarial.txt";
const CHECKPOINT_FILE: &str = "model.json";

#[derive(Parser, Debug)]
#[command(name = "eval-adversarial")]
#[command(about = "Evaluate a prior network on clean and adversarially perturbed data")]
#[command(version)]
struct Args {
    /// Clean dataset pattern (file, directory or `*` glob)
    in_domain_pattern: PathBuf,

    /// Perturbed dataset pattern, example-aligned with the clean one
    out_domain_pattern: PathBuf,

    /// Directory for every output of the run
    output_dir: PathBuf,

    /// Network architecture of the checkpoint
    #[arg(value_enum)]
    model_type: ModelType,

    /// Checkpoint file, or directory holding `model.json`
    #[arg(long, default_value = "./")]
    load_path: PathBuf,

    /// Random seed for dropout and input noise
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Print the separation table and measure means
    #[arg(long)]
    show: bool,

    /// Replace results already present in the output directory
    #[arg(long)]
    overwrite: bool,

    /// Score attacks against the least likely class instead of the runner-up
    #[arg(long)]
    least_likely: bool,

    /// Plot uncertainty distributions on a log scale
    #[arg(long)]
    log: bool,

    /// Standard deviation of Gaussian noise added to the inputs
    #[arg(long, default_value_t = 0.0)]
    noise_corruption: f64,

    /// Examples per inference batch
    #[arg(long, default_value_t = 100)]
    batch_size: usize,

    /// Stochastic forward passes per example
    #[arg(long, default_value_t = 1)]
    n_samples: usize,

    /// Dropout retention probability
    #[arg(long, default_value_t = 1.0)]
    dropout: f64,

    /// Use ln(p + eps) so zero probabilities do not abort the run
    #[arg(long)]
    log_epsilon: Option<f64>,
}

/// Append this invocation to the shared command log
fn log_invocation() -> Result<()> {
    let dir = Path::new(COMMAND_LOG_DIR);
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let path = dir.join(COMMAND_LOG_FILE);
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let command: Vec<String> = std::env::args().collect();
    writeln!(file, "{}", command.join(" "))?;
    writeln!(file, "--------------------------------")?;
    Ok(())
}

fn checkpoint_path(load_path: &Path) -> PathBuf {
    if load_path.is_dir() {
        load_path.join(CHECKPOINT_FILE)
    } else {
        load_path.to_path_buf()
    }
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    log_invocation()?;

    tracing::info!("Prior Network Adversarial Evaluation");
    tracing::info!("====================================");
    tracing::info!("In-domain:  {}", args.in_domain_pattern.display());
    tracing::info!("Out-domain: {}", args.out_domain_pattern.display());
    tracing::info!("Model:      {:?}", args.model_type);
    tracing::info!("Seed:       {}", args.seed);

    let config = AdversarialEvalConfig {
        in_domain_pattern: args.in_domain_pattern,
        out_domain_pattern: args.out_domain_pattern,
        output_dir: args.output_dir,
        inference: InferenceParams {
            batch_size: args.batch_size,
            sample_count: args.n_samples,
            dropout_retention: args.dropout,
            corruption_level: args.noise_corruption,
        },
        objective: AttackObjective::from_least_likely(args.least_likely),
        log_scale: args.log,
        overwrite: args.overwrite,
        show: args.show,
        log_epsilon: args.log_epsilon,
    };

    let checkpoint = checkpoint_path(&args.load_path);
    let classifier = load_classifier(args.model_type, &checkpoint, args.seed)
        .with_context(|| format!("Failed to restore classifier from {}", checkpoint.display()))?;
    let renderer = CurveDataRenderer::default();

    let pipeline = AdversarialPipeline::new(config, classifier.as_ref(), &renderer);
    let results = pipeline.run()?;

    println!("\n{}", results.format());
    println!("Results saved to: {}", pipeline.config().output_dir.display());

    Ok(())
}
