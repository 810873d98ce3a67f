// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset loading for classifier evaluation
//!
//! A dataset pattern names one of:
//! - a single CSV file
//! - a directory, in which case every `*.csv` file inside is read
//! - a file-name glob such as `data/adv_fgsm_*.csv` (`*` in the last component)
//!
//! Rows are `label,f1,...,fD` without a header. Matched files are read in
//! sorted order so that paired in-domain and out-domain patterns line up
//! example-for-example.

use crate::error::{EvalError, Result};
use crate::network::standard_normal;
use ndarray::Array2;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Labelled feature matrix read from a dataset pattern
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Pattern the dataset was loaded from
    pub pattern: String,
    /// Ground-truth class id per example
    pub labels: Vec<usize>,
    /// One row of features per example
    pub features: Array2<f64>,
}

impl Dataset {
    /// Load every file matched by `pattern`
    pub fn load(pattern: &Path) -> Result<Self> {
        let files = resolve_pattern(pattern)?;

        let mut labels = Vec::new();
        let mut values = Vec::new();
        let mut width: Option<usize> = None;

        for file in &files {
            tracing::debug!("Reading dataset file {}", file.display());
            load_csv(file, &mut labels, &mut values, &mut width)?;
        }

        let n_features = width.unwrap_or(0);
        if labels.is_empty() || n_features == 0 {
            return Err(EvalError::Dataset {
                path: pattern.to_path_buf(),
                reason: "pattern matched no examples".to_string(),
            });
        }

        let features = Array2::from_shape_vec((labels.len(), n_features), values)
            .map_err(|e| EvalError::Shape(e.to_string()))?;

        tracing::info!(
            "Loaded {} examples with {} features from {} file(s) matching {}",
            labels.len(),
            n_features,
            files.len(),
            pattern.display()
        );

        Ok(Self {
            pattern: pattern.display().to_string(),
            labels,
            features,
        })
    }

    /// Generate a labelled Gaussian-blob dataset for development and testing
    ///
    /// Class `c` is centred on a vector with `2.0` in every feature `j` where
    /// `j % n_classes == c`.
    pub fn load_synthetic(size: usize, n_features: usize, n_classes: usize, seed: u64) -> Self {
        use rand::{Rng, SeedableRng};
        use rand_chacha::ChaCha8Rng;

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n_classes = n_classes.max(1);

        let mut labels = Vec::with_capacity(size);
        let mut features = Array2::zeros((size, n_features));

        for mut row in features.rows_mut() {
            let label = rng.gen_range(0..n_classes);
            for (j, value) in row.iter_mut().enumerate() {
                let centre = if j % n_classes == label { 2.0 } else { 0.0 };
                *value = centre + 0.5 * standard_normal(&mut rng);
            }
            labels.push(label);
        }

        Self {
            pattern: format!("synthetic:{}", seed),
            labels,
            features,
        }
    }

    /// Write the dataset back out as a headerless CSV file
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;

        for (label, row) in self.labels.iter().zip(self.features.rows()) {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(label.to_string());
            record.extend(row.iter().map(|v| v.to_string()));
            writer.write_record(&record)?;
        }

        writer.flush().map_err(|e| EvalError::io(path, e))?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.features.ncols()
    }

    /// Count examples per class id
    pub fn class_distribution(&self) -> BTreeMap<usize, usize> {
        let mut dist = BTreeMap::new();
        for label in &self.labels {
            *dist.entry(*label).or_insert(0) += 1;
        }
        dist
    }
}

/// Expand a dataset pattern into the sorted list of files it names
pub fn resolve_pattern(pattern: &Path) -> Result<Vec<PathBuf>> {
    if pattern.is_file() {
        return Ok(vec![pattern.to_path_buf()]);
    }

    let (dir, name_pattern) = if pattern.is_dir() {
        (pattern.to_path_buf(), "*.csv".to_string())
    } else {
        let name = pattern
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !name.contains('*') {
            return Err(EvalError::Dataset {
                path: pattern.to_path_buf(),
                reason: "no such file or directory".to_string(),
            });
        }
        let dir = match pattern.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        (dir, name)
    };

    let entries = fs::read_dir(&dir).map_err(|e| EvalError::io(&dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| EvalError::io(&dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if matches_wildcard(&name, &name_pattern) {
            files.push(path);
        }
    }
    files.sort();

    if files.is_empty() {
        return Err(EvalError::Dataset {
            path: pattern.to_path_buf(),
            reason: "pattern matched no files".to_string(),
        });
    }

    Ok(files)
}

/// Match `name` against a pattern where `*` stands for any run of characters
fn matches_wildcard(name: &str, pattern: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return name == pattern;
    }

    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !name.starts_with(first) || name.len() < first.len() + last.len() {
        return false;
    }
    if !name[first.len()..].ends_with(last) {
        return false;
    }

    let mut rest = &name[first.len()..name.len() - last.len()];
    for middle in &parts[1..parts.len() - 1] {
        match rest.find(middle) {
            Some(pos) => rest = &rest[pos + middle.len()..],
            None => return false,
        }
    }
    true
}

fn load_csv(
    path: &Path,
    labels: &mut Vec<usize>,
    values: &mut Vec<f64>,
    width: &mut Option<usize>,
) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .from_path(path)?;

    for (idx, record) in reader.records().enumerate() {
        let record = record?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }

        let malformed = |reason: String| EvalError::Dataset {
            path: path.to_path_buf(),
            reason: format!("record {}: {}", idx, reason),
        };

        let n_features = record.len().saturating_sub(1);
        if n_features == 0 {
            return Err(malformed("expected a label followed by features".to_string()));
        }
        match *width {
            Some(w) if w != n_features => {
                return Err(malformed(format!("expected {} features, found {}", w, n_features)));
            }
            None => *width = Some(n_features),
            _ => {}
        }

        let label = record[0]
            .parse::<usize>()
            .map_err(|_| malformed(format!("invalid class id '{}'", &record[0])))?;
        labels.push(label);

        for field in record.iter().skip(1) {
            let value = field
                .parse::<f64>()
                .map_err(|_| malformed(format!("invalid feature '{}'", field)))?;
            values.push(value);
        }
    }

    Ok(())
}
