//! Scaling engine
//!
//! Features are normalized per *scaling group*, not per column: every column
//! in a group shares one parameter pair computed from the pooled values of
//! the whole group, so co-scaled features (e.g. several throughput estimates
//! in the same units) keep their relative structure.
//!
//! Degenerate groups (std = 0 under standardization, min = max under range
//! scaling) map to all zeros instead of dividing by zero.

use crate::matrix::FeatureMatrix;
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Opaque scaling-group key.
pub type GroupKey = u32;

/// Normalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalingMode {
    /// Mean 0, variance 1. Parameters are `(mean, std)`.
    Standardize,
    /// Linear map to `[0, 1]`. Parameters are `(min, max)`.
    Range,
}

impl From<bool> for ScalingMode {
    fn from(standardize: bool) -> Self {
        if standardize {
            Self::Standardize
        } else {
            Self::Range
        }
    }
}

/// Per-feature scaling parameters, in feature order.
///
/// Serializes as an ordered list of `[param1, param2]` pairs, which is the
/// format inference-time callers read from `scale_params.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScaleParams {
    params: Vec<[f64; 2]>,
}

impl ScaleParams {
    /// Wrap an explicit parameter list.
    #[must_use]
    pub fn new(params: Vec<[f64; 2]>) -> Self {
        Self { params }
    }

    /// Parameter pairs in feature order.
    #[must_use]
    pub fn pairs(&self) -> &[[f64; 2]] {
        &self.params
    }

    /// Number of features covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True if no features are covered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Apply these (frozen) parameters to a matrix with the same features.
    ///
    /// # Errors
    ///
    /// Returns error if the matrix has a different number of columns.
    pub fn apply(&self, matrix: &FeatureMatrix, mode: ScalingMode) -> Result<FeatureMatrix> {
        if matrix.num_columns() != self.params.len() {
            return Err(Error::InvalidInput(format!(
                "{} scaling parameters for {} features",
                self.params.len(),
                matrix.num_columns()
            )));
        }
        let columns = matrix
            .columns()
            .iter()
            .zip(&self.params)
            .map(|(col, &[p1, p2])| transform(col, p1, p2, mode))
            .collect();
        FeatureMatrix::new(matrix.names().to_vec(), columns)
    }

    /// Write the parameters as JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be created or written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Read parameters previously written by [`ScaleParams::save`].
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or is not a list of pairs.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// Scale every feature of `matrix` using its group's pooled parameters.
///
/// `groups[i]` is the scaling group of column `i`. Returns the scaled matrix
/// and the per-feature parameter table.
///
/// # Errors
///
/// Returns error if `groups` does not have exactly one entry per feature.
///
/// # Examples
///
/// ```rust
/// use fairshare::matrix::FeatureMatrix;
/// use fairshare::scaling::{scale_features, ScalingMode};
///
/// # fn main() -> fairshare::Result<()> {
/// let m = FeatureMatrix::new(vec!["x".into()], vec![vec![1.0, 2.0, 3.0, 4.0, 5.0]])?;
/// let (scaled, params) = scale_features(&m, &[0], ScalingMode::Standardize)?;
/// assert!((params.pairs()[0][0] - 3.0).abs() < 1e-12);
/// assert!(scaled.column(0)[2].abs() < 1e-12);
/// # Ok(())
/// # }
/// ```
pub fn scale_features(
    matrix: &FeatureMatrix,
    groups: &[GroupKey],
    mode: ScalingMode,
) -> Result<(FeatureMatrix, ScaleParams)> {
    if groups.len() != matrix.num_columns() {
        return Err(Error::InvalidInput(format!(
            "Invalid scaling groups: {} entries for {} features",
            groups.len(),
            matrix.num_columns()
        )));
    }

    let mut group_params: FxHashMap<GroupKey, [f64; 2]> = FxHashMap::default();
    for &group in groups {
        if group_params.contains_key(&group) {
            continue;
        }
        let pooled: Vec<&[f64]> = groups
            .iter()
            .zip(matrix.columns())
            .filter(|(g, _)| **g == group)
            .map(|(_, col)| col.as_slice())
            .collect();
        group_params.insert(group, pooled_params(&pooled, mode));
    }

    let params: Vec<[f64; 2]> = groups.iter().map(|g| group_params[g]).collect();
    let params = ScaleParams::new(params);
    let scaled = params.apply(matrix, mode)?;
    Ok((scaled, params))
}

#[allow(clippy::cast_precision_loss)]
fn pooled_params(columns: &[&[f64]], mode: ScalingMode) -> [f64; 2] {
    let values = || columns.iter().flat_map(|col| col.iter().copied());
    match mode {
        ScalingMode::Standardize => {
            let count = columns.iter().map(|col| col.len()).sum::<usize>();
            if count == 0 {
                return [0.0, 0.0];
            }
            let n = count as f64;
            let mean = values().sum::<f64>() / n;
            // A constant group must stay degenerate even when `mean` rounds.
            let first = values().next().unwrap_or_default();
            if values().all(|v| v.to_bits() == first.to_bits()) {
                return [mean, 0.0];
            }
            let var = values().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
            [mean, var.sqrt()]
        }
        ScalingMode::Range => {
            let min = values().fold(f64::INFINITY, f64::min);
            let max = values().fold(f64::NEG_INFINITY, f64::max);
            if min > max {
                [0.0, 0.0]
            } else {
                [min, max]
            }
        }
    }
}

#[allow(clippy::float_cmp)]
fn transform(col: &[f64], p1: f64, p2: f64, mode: ScalingMode) -> Vec<f64> {
    match mode {
        ScalingMode::Standardize if p2 == 0.0 => vec![0.0; col.len()],
        ScalingMode::Standardize => col.iter().map(|v| (v - p1) / p2).collect(),
        ScalingMode::Range if p1 == p2 => vec![0.0; col.len()],
        ScalingMode::Range => col.iter().map(|v| (v - p1) / (p2 - p1)).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(cols: Vec<Vec<f64>>) -> FeatureMatrix {
        let names = (0..cols.len()).map(|i| format!("f{i}")).collect();
        FeatureMatrix::new(names, cols).unwrap()
    }

    #[test]
    fn test_standardize_one_to_five() {
        let m = matrix(vec![vec![1.0, 2.0, 3.0, 4.0, 5.0]]);
        let (scaled, params) = scale_features(&m, &[0], ScalingMode::Standardize).unwrap();
        let [mean, std] = params.pairs()[0];
        assert!((mean - 3.0).abs() < 1e-12);
        assert!((std - 2f64.sqrt()).abs() < 1e-12);
        assert!(scaled.column(0)[2].abs() < 1e-12);
        assert!((scaled.column(0)[0] + 2.0 / 2f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_group_parameters_are_pooled() {
        // Column 0 and 2 share group 7, column 1 is on its own.
        let m = matrix(vec![vec![0.0, 1.0], vec![5.0, 5.0], vec![2.0, 3.0]]);
        let (scaled, params) = scale_features(&m, &[7, 1, 7], ScalingMode::Range).unwrap();
        assert_eq!(params.pairs()[0], [0.0, 3.0]);
        assert_eq!(params.pairs()[2], [0.0, 3.0]);
        assert_eq!(params.pairs()[1], [5.0, 5.0]);
        assert_eq!(scaled.column(2), &[2.0 / 3.0, 1.0]);
    }

    #[test]
    fn test_degenerate_groups_map_to_zero() {
        let m = matrix(vec![vec![4.0, 4.0, 4.0]]);
        for mode in [ScalingMode::Standardize, ScalingMode::Range] {
            let (scaled, _) = scale_features(&m, &[0], mode).unwrap();
            assert_eq!(scaled.column(0), &[0.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_rejects_wrong_group_count() {
        let m = matrix(vec![vec![1.0], vec![2.0]]);
        let err = scale_features(&m, &[0], ScalingMode::Range).unwrap_err();
        assert!(err.to_string().contains("Invalid scaling groups"));
    }

    #[test]
    fn test_standardize_is_idempotent() {
        let m = matrix(vec![vec![1.0, 7.0, -3.0, 2.5], vec![10.0, 11.0, 9.0, 30.0]]);
        let (once, _) = scale_features(&m, &[0, 0], ScalingMode::Standardize).unwrap();
        let (twice, _) = scale_features(&once, &[0, 0], ScalingMode::Standardize).unwrap();
        for (a, b) in once.columns().iter().flatten().zip(twice.columns().iter().flatten()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_params_round_trip_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scale_params.json");
        let params = ScaleParams::new(vec![[0.1, 0.7], [3.0, 1.0 / 3.0]]);
        params.save(&path).unwrap();
        let loaded = ScaleParams::load(&path).unwrap();
        assert_eq!(loaded.len(), params.len());
        for (a, b) in loaded.pairs().iter().flatten().zip(params.pairs().iter().flatten()) {
            assert!((a - b).abs() <= f64::EPSILON * b.abs());
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("[["));
    }
}
