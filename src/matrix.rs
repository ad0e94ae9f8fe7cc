//! Named, column-major feature tables
//!
//! A [`FeatureMatrix`] is the in-memory shape of every table the pipeline
//! moves around: raw simulation measurements, the input/output sub-matrices
//! split off them, and the assembled dataset. Columns are stored
//! contiguously so that scaling and sentinel repair work per feature.

use crate::{Error, Result};
use std::ops::Range;

/// A table of named `f64` columns with equal lengths.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureMatrix {
    names: Vec<String>,
    columns: Vec<Vec<f64>>,
}

impl FeatureMatrix {
    /// Create a matrix from column names and column data.
    ///
    /// # Errors
    ///
    /// Returns error if the number of names differs from the number of
    /// columns, if a name repeats, or if the columns have different lengths.
    pub fn new(names: Vec<String>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if names.len() != columns.len() {
            return Err(Error::InvalidInput(format!(
                "{} column names for {} columns",
                names.len(),
                columns.len()
            )));
        }
        for (idx, name) in names.iter().enumerate() {
            if names[..idx].contains(name) {
                return Err(Error::InvalidInput(format!("Duplicate column: {name}")));
            }
        }
        if let Some(first) = columns.first() {
            if let Some((idx, _)) = columns
                .iter()
                .enumerate()
                .find(|(_, col)| col.len() != first.len())
            {
                return Err(Error::InvalidInput(format!(
                    "Column {} has {} rows, expected {}",
                    names[idx],
                    columns[idx].len(),
                    first.len()
                )));
            }
        }
        Ok(Self { names, columns })
    }

    /// Create a matrix with the given columns and no rows.
    #[must_use]
    pub fn empty(names: Vec<String>) -> Self {
        let columns = vec![Vec::new(); names.len()];
        Self { names, columns }
    }

    /// Number of rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, Vec::len)
    }

    /// Number of columns (features).
    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.names.len()
    }

    /// Column names in order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// All columns in order.
    #[must_use]
    pub fn columns(&self) -> &[Vec<f64>] {
        &self.columns
    }

    /// Mutable access to the column data. Lengths must be kept equal.
    pub(crate) fn columns_mut(&mut self) -> &mut [Vec<f64>] {
        &mut self.columns
    }

    /// Column by index.
    #[must_use]
    pub fn column(&self, idx: usize) -> &[f64] {
        &self.columns[idx]
    }

    /// Column by name, if present.
    #[must_use]
    pub fn column_by_name(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.columns[idx].as_slice())
    }

    /// Project onto the named columns, in the given order.
    ///
    /// # Errors
    ///
    /// Returns error naming the first column that does not exist.
    pub fn select_columns(&self, names: &[String]) -> Result<Self> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let col = self
                .column_by_name(name)
                .ok_or_else(|| Error::InvalidInput(format!("Missing column: {name}")))?;
            columns.push(col.to_vec());
        }
        Ok(Self {
            names: names.to_vec(),
            columns,
        })
    }

    /// Gather the given rows, in the given order (repeats allowed).
    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|col| rows.iter().map(|&row| col[row]).collect())
            .collect();
        Self {
            names: self.names.clone(),
            columns,
        }
    }

    /// Copy a contiguous range of rows.
    #[must_use]
    pub fn slice_rows(&self, range: Range<usize>) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|col| col[range.clone()].to_vec())
            .collect();
        Self {
            names: self.names.clone(),
            columns,
        }
    }

    /// Name of the first column holding a NaN or infinity, if any.
    #[must_use]
    pub fn first_non_finite(&self) -> Option<&str> {
        self.names
            .iter()
            .zip(&self.columns)
            .find(|(_, col)| col.iter().any(|v| !v.is_finite()))
            .map(|(name, _)| name.as_str())
    }

    /// Append the rows of `other`, which must have identical column names.
    ///
    /// # Errors
    ///
    /// Returns error if the column names differ.
    pub fn append(&mut self, other: &Self) -> Result<()> {
        if self.names != other.names {
            return Err(Error::SchemaMismatch(format!(
                "columns {:?} != {:?}",
                other.names, self.names
            )));
        }
        for (dst, src) in self.columns.iter_mut().zip(&other.columns) {
            dst.extend_from_slice(src);
        }
        Ok(())
    }

    /// Copy one row.
    #[must_use]
    pub fn row(&self, idx: usize) -> Vec<f64> {
        self.columns.iter().map(|col| col[idx]).collect()
    }

    /// Convert to row-major form.
    #[must_use]
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.num_rows()).map(|idx| self.row(idx)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FeatureMatrix {
        FeatureMatrix::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![1.0, 2.0, 3.0], vec![10.0, 20.0, 30.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_ragged_columns() {
        let result = FeatureMatrix::new(
            vec!["a".to_string(), "b".to_string()],
            vec![vec![1.0], vec![1.0, 2.0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_new_rejects_duplicate_names() {
        let result = FeatureMatrix::new(
            vec!["a".to_string(), "a".to_string()],
            vec![vec![1.0], vec![2.0]],
        );
        assert!(result.unwrap_err().to_string().contains("Duplicate"));
    }

    #[test]
    fn test_select_rows_keeps_columns_aligned() {
        let m = sample().select_rows(&[2, 0, 2]);
        assert_eq!(m.column(0), &[3.0, 1.0, 3.0]);
        assert_eq!(m.column(1), &[30.0, 10.0, 30.0]);
    }

    #[test]
    fn test_select_columns_missing() {
        let err = sample().select_columns(&["c".to_string()]).unwrap_err();
        assert!(err.to_string().contains("Missing column: c"));
    }

    #[test]
    fn test_first_non_finite() {
        let mut m = sample();
        assert!(m.first_non_finite().is_none());
        m.columns_mut()[1][1] = f64::INFINITY;
        assert_eq!(m.first_non_finite(), Some("b"));
    }

    #[test]
    fn test_append_and_rows() {
        let mut m = sample();
        m.append(&sample().slice_rows(0..1)).unwrap();
        assert_eq!(m.num_rows(), 4);
        assert_eq!(m.row(3), vec![1.0, 10.0]);
        assert_eq!(m.to_rows().len(), 4);
    }
}
