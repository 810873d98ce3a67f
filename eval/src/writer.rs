// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Flat-file persistence of per-example scores and run aggregates
//!
//! Score files hold one value per line. Floating-point values use the
//! `%.18e` layout (`1.000000000000000000e+00`), which reads back losslessly.

use crate::error::{Domain, EvalError, Result};
use crate::uncertainty::UncertaintyMeasures;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const SUCCESSFUL_ATTACKS_FILE: &str = "successful_attacks.txt";
pub const CLASS_FLIPPED_FILE: &str = "class_flipped.txt";
pub const RESULTS_FILE: &str = "results.txt";
pub const SUMMARY_FILE: &str = "summary.json";

/// Make `dir` ready for a fresh run
///
/// A missing directory is created. An existing non-empty directory is a
/// conflict unless `overwrite` is set, in which case its contents are removed.
pub fn prepare_output_dir(dir: &Path, overwrite: bool) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| EvalError::io(dir, e))?;
        tracing::info!("Created output directory {}", dir.display());
        return Ok(());
    }
    if !dir.is_dir() {
        return Err(EvalError::OutputConflict {
            path: dir.to_path_buf(),
        });
    }

    let entries: Vec<PathBuf> = fs::read_dir(dir)
        .map_err(|e| EvalError::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()
        .map_err(|e| EvalError::io(dir, e))?;

    if entries.is_empty() {
        return Ok(());
    }
    if !overwrite {
        return Err(EvalError::OutputConflict {
            path: dir.to_path_buf(),
        });
    }

    tracing::warn!("Overwriting {} entries in {}", entries.len(), dir.display());
    for entry in entries {
        let removed = if entry.is_dir() {
            fs::remove_dir_all(&entry)
        } else {
            fs::remove_file(&entry)
        };
        removed.map_err(|e| EvalError::io(&entry, e))?;
    }
    Ok(())
}

/// Format a value the way `%.18e` does
pub fn format_scientific(value: f64) -> String {
    if !value.is_finite() {
        return if value.is_nan() {
            "nan".to_string()
        } else if value > 0.0 {
            "inf".to_string()
        } else {
            "-inf".to_string()
        };
    }

    let formatted = format!("{:.18e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => formatted,
    }
}

/// Format a fraction as a percentage rounded to one decimal place
pub fn format_percent(fraction: f64) -> String {
    format!("{:.1}%", 100.0 * fraction)
}

/// Read a one-value-per-line score file
pub fn read_values(path: &Path) -> Result<Vec<f64>> {
    let text = fs::read_to_string(path).map_err(|e| EvalError::io(path, e))?;
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .enumerate()
        .map(|(idx, line)| {
            line.parse::<f64>().map_err(|_| EvalError::Dataset {
                path: path.to_path_buf(),
                reason: format!("line {}: '{}' is not a number", idx, line),
            })
        })
        .collect()
}

/// Writes every artifact of one run into its output directory
#[derive(Debug, Clone)]
pub struct ResultWriter {
    dir: PathBuf,
}

impl ResultWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Successful-attack mask as floats
    pub fn write_successful_attacks(&self, flipped: &[bool]) -> Result<PathBuf> {
        let values: Vec<f64> = flipped.iter().map(|f| if *f { 1.0 } else { 0.0 }).collect();
        self.write_floats(SUCCESSFUL_ATTACKS_FILE, &values)
    }

    /// Class-change mask as integers
    pub fn write_class_flipped(&self, class_changed: &[bool]) -> Result<PathBuf> {
        let path = self.dir.join(CLASS_FLIPPED_FILE);
        let mut body = String::with_capacity(class_changed.len() * 2);
        for changed in class_changed {
            body.push_str(if *changed { "1\n" } else { "0\n" });
        }
        fs::write(&path, body).map_err(|e| EvalError::io(&path, e))?;
        Ok(path)
    }

    /// One `<measure>_in.txt` / `<measure>_out.txt` file per measure
    pub fn write_measures(&self, measures: &UncertaintyMeasures, domain: Domain) -> Result<Vec<PathBuf>> {
        let suffix = match domain {
            Domain::In => "in",
            Domain::Out => "out",
        };
        measures
            .iter()
            .map(|(measure, values)| self.write_floats(&format!("{}_{}.txt", measure.key(), suffix), values))
            .collect()
    }

    /// Append the two aggregate lines to `results.txt`
    pub fn append_summary(&self, classification_error: f64, success_rate: f64) -> Result<()> {
        let path = self.dir.join(RESULTS_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| EvalError::io(&path, e))?;

        writeln!(file, "Classification Error: {}", format_percent(classification_error))
            .and_then(|_| writeln!(file, "Adversarial Success rate: {}", format_percent(success_rate)))
            .map_err(|e| EvalError::io(&path, e))
    }

    /// Serialize run results as pretty JSON
    pub fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let json = serde_json::to_string_pretty(value)?;
        fs::write(&path, json).map_err(|e| EvalError::io(&path, e))?;
        Ok(path)
    }

    fn write_floats(&self, file_name: &str, values: &[f64]) -> Result<PathBuf> {
        let path = self.dir.join(file_name);
        let mut body = String::with_capacity(values.len() * 26);
        for value in values {
            body.push_str(&format_scientific(*value));
            body.push('\n');
        }
        fs::write(&path, body).map_err(|e| EvalError::io(&path, e))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uncertainty::{compute_uncertainties, Measure};
    use ndarray::array;

    #[test]
    fn test_scientific_layout() {
        assert_eq!(format_scientific(1.0), "1.000000000000000000e+00");
        assert_eq!(format_scientific(0.0), "0.000000000000000000e+00");
        assert_eq!(format_scientific(-0.00125), "-1.250000000000000000e-03");
        assert_eq!(format_scientific(1.5e120), "1.500000000000000000e+120");
    }

    #[test]
    fn test_percent_rounding() {
        assert_eq!(format_percent(0.25), "25.0%");
        assert_eq!(format_percent(1.0 / 3.0), "33.3%");
        assert_eq!(format_percent(0.0), "0.0%");
        assert_eq!(format_percent(1.0), "100.0%");
    }

    #[test]
    fn test_measure_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path());

        let logits = array![[1.3, -0.2, 0.7], [0.01, 4.5, -2.0]];
        let alphas = logits.mapv(f64::exp);
        let probs = &alphas / &alphas.sum_axis(ndarray::Axis(1)).insert_axis(ndarray::Axis(1));
        let measures = compute_uncertainties(Domain::In, probs.view(), alphas.view()).unwrap();

        let paths = writer.write_measures(&measures, Domain::In).unwrap();
        assert_eq!(paths.len(), Measure::ALL.len());

        for (measure, values) in measures.iter() {
            let path = dir.path().join(format!("{}_in.txt", measure.key()));
            let read = read_values(&path).unwrap();
            assert_eq!(read.len(), values.len());
            for (a, b) in read.iter().zip(values) {
                assert!((a - b).abs() <= 1e-15 * b.abs().max(1.0));
            }
        }
    }

    #[test]
    fn test_masks_written() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path());

        writer.write_successful_attacks(&[true, false]).unwrap();
        writer.write_class_flipped(&[false, true]).unwrap();

        assert_eq!(read_values(&dir.path().join(SUCCESSFUL_ATTACKS_FILE)).unwrap(), vec![1.0, 0.0]);
        let flipped = std::fs::read_to_string(dir.path().join(CLASS_FLIPPED_FILE)).unwrap();
        assert_eq!(flipped, "0\n1\n");
    }

    #[test]
    fn test_summary_appends() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ResultWriter::new(dir.path());

        writer.append_summary(0.125, 0.5).unwrap();
        writer.append_summary(0.0, 1.0).unwrap();

        let text = std::fs::read_to_string(dir.path().join(RESULTS_FILE)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Classification Error: 12.5%",
                "Adversarial Success rate: 50.0%",
                "Classification Error: 0.0%",
                "Adversarial Success rate: 100.0%",
            ]
        );
    }

    #[test]
    fn test_prepare_conflict_and_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("run");

        prepare_output_dir(&out, false).unwrap();
        assert!(out.is_dir());
        // Empty directory is reusable
        prepare_output_dir(&out, false).unwrap();

        std::fs::write(out.join(RESULTS_FILE), "old\n").unwrap();
        std::fs::create_dir(out.join("nested")).unwrap();
        assert!(matches!(
            prepare_output_dir(&out, false),
            Err(EvalError::OutputConflict { .. })
        ));

        prepare_output_dir(&out, true).unwrap();
        assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
    }
}
