//! Dataset assembly
//!
//! Per-simulation [`ExampleSet`]s come out of ingestion; the assembler
//! checks they agree on shape, concatenates them, repairs the "unknown"
//! sentinel and scales the inputs. The result is a frozen [`Dataset`] whose
//! five arrays stay row-aligned through every later shuffle and split.

pub mod sampler;
pub mod split;

use crate::ingest::{self, ScratchHandle};
use crate::matrix::FeatureMatrix;
use crate::scaling::{scale_features, GroupKey, ScaleParams, ScalingMode};
use crate::simulation::Simulation;
use crate::{storage, Error, Result};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info};

/// Value marking an unknown measurement.
pub const UNKNOWN_SENTINEL: f64 = -1.0;

/// Assembled dataset file name.
pub const DATA_FILE: &str = "data.parquet";

/// Scaling parameters file name.
pub const SCALE_PARAMS_FILE: &str = "scale_params.json";

/// Labeled examples from a single simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExampleSet {
    /// Input features (unscaled).
    pub inputs: FeatureMatrix,
    /// Class per row.
    pub labels: Vec<u32>,
    /// Raw label per row.
    pub raw_labels: Vec<f64>,
    /// Oracle label per row.
    pub oracle_labels: Vec<f64>,
    /// Scaling group per input feature.
    pub scaling_groups: Vec<GroupKey>,
}

impl ExampleSet {
    /// Number of examples.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.inputs.num_rows()
    }

    /// Check that every per-row array has one entry per input row and that
    /// there is one scaling group per feature.
    ///
    /// # Errors
    ///
    /// Returns error describing the first misaligned array.
    pub fn check_aligned(&self) -> Result<()> {
        let rows = self.num_rows();
        for (name, len) in [
            ("labels", self.labels.len()),
            ("raw labels", self.raw_labels.len()),
            ("oracle labels", self.oracle_labels.len()),
        ] {
            if len != rows {
                return Err(Error::InvalidInput(format!(
                    "{len} {name} for {rows} input rows"
                )));
            }
        }
        if self.scaling_groups.len() != self.inputs.num_columns() {
            return Err(Error::InvalidInput(format!(
                "Invalid scaling groups: {} entries for {} features",
                self.scaling_groups.len(),
                self.inputs.num_columns()
            )));
        }
        Ok(())
    }

    /// Gather the given rows of every array (repeats allowed).
    #[must_use]
    pub fn select_rows(&self, rows: &[usize]) -> Self {
        Self {
            inputs: self.inputs.select_rows(rows),
            labels: rows.iter().map(|&r| self.labels[r]).collect(),
            raw_labels: rows.iter().map(|&r| self.raw_labels[r]).collect(),
            oracle_labels: rows.iter().map(|&r| self.oracle_labels[r]).collect(),
            scaling_groups: self.scaling_groups.clone(),
        }
    }
}

/// The assembled, scaled dataset.
///
/// Frozen after assembly: only whole-row operations (permutation, slicing)
/// are available, so the arrays cannot drift apart.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: FeatureMatrix,
    labels: Vec<u32>,
    raw_labels: Vec<f64>,
    oracle_labels: Vec<f64>,
    num_flows: Vec<u32>,
}

impl Dataset {
    /// Create a dataset from row-aligned arrays.
    ///
    /// # Errors
    ///
    /// Returns error if any array length differs from the number of rows.
    pub fn new(
        inputs: FeatureMatrix,
        labels: Vec<u32>,
        raw_labels: Vec<f64>,
        oracle_labels: Vec<f64>,
        num_flows: Vec<u32>,
    ) -> Result<Self> {
        let rows = inputs.num_rows();
        if [
            labels.len(),
            raw_labels.len(),
            oracle_labels.len(),
            num_flows.len(),
        ]
        .iter()
        .any(|&len| len != rows)
        {
            return Err(Error::InvalidInput(format!(
                "Dataset arrays are not row-aligned with {rows} input rows"
            )));
        }
        Ok(Self {
            inputs,
            labels,
            raw_labels,
            oracle_labels,
            num_flows,
        })
    }

    /// Number of examples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True if the dataset has no examples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Scaled input features.
    #[must_use]
    pub const fn inputs(&self) -> &FeatureMatrix {
        &self.inputs
    }

    /// Class labels.
    #[must_use]
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Raw labels.
    #[must_use]
    pub fn raw_labels(&self) -> &[f64] {
        &self.raw_labels
    }

    /// Oracle labels.
    #[must_use]
    pub fn oracle_labels(&self) -> &[f64] {
        &self.oracle_labels
    }

    /// Total flows of each row's simulation.
    #[must_use]
    pub fn num_flows(&self) -> &[u32] {
        &self.num_flows
    }

    /// Reorder every array with the same permutation (or any row index list).
    #[must_use]
    pub fn permuted(&self, order: &[usize]) -> Self {
        Self {
            inputs: self.inputs.select_rows(order),
            labels: order.iter().map(|&r| self.labels[r]).collect(),
            raw_labels: order.iter().map(|&r| self.raw_labels[r]).collect(),
            oracle_labels: order.iter().map(|&r| self.oracle_labels[r]).collect(),
            num_flows: order.iter().map(|&r| self.num_flows[r]).collect(),
        }
    }

    /// Copy a contiguous range of rows.
    #[must_use]
    pub fn slice_rows(&self, range: Range<usize>) -> Self {
        Self {
            inputs: self.inputs.slice_rows(range.clone()),
            labels: self.labels[range.clone()].to_vec(),
            raw_labels: self.raw_labels[range.clone()].to_vec(),
            oracle_labels: self.oracle_labels[range.clone()].to_vec(),
            num_flows: self.num_flows[range].to_vec(),
        }
    }

    /// Row-major inputs and labels of the given rows.
    #[must_use]
    pub fn gather(&self, rows: &[usize]) -> (Vec<Vec<f64>>, Vec<u32>) {
        let inputs = rows.iter().map(|&r| self.inputs.row(r)).collect();
        let labels = rows.iter().map(|&r| self.labels[r]).collect();
        (inputs, labels)
    }
}

/// Merge per-simulation example sets into one scaled dataset.
///
/// # Errors
///
/// - `NoUsableSimulations` if `parts` is empty
/// - `SchemaMismatch` if the sets disagree on features or scaling groups
/// - `UnusableFeatures` if a feature holds only the unknown sentinel
pub fn assemble(
    parts: Vec<(Simulation, ExampleSet)>,
    mode: ScalingMode,
) -> Result<(Dataset, ScaleParams)> {
    let mut parts = parts.into_iter();
    let Some((first_sim, first)) = parts.next() else {
        return Err(Error::NoUsableSimulations { discarded: 0 });
    };
    first.check_aligned()?;

    let groups = first.scaling_groups;
    let mut inputs = first.inputs;
    let mut labels = first.labels;
    let mut raw_labels = first.raw_labels;
    let mut oracle_labels = first.oracle_labels;
    let mut num_flows = vec![first_sim.total_flows(); labels.len()];
    let mut num_sims = 1usize;

    for (sim, set) in parts {
        set.check_aligned()?;
        if set.inputs.names() != inputs.names() {
            return Err(Error::SchemaMismatch(format!(
                "{} has features {:?}, expected {:?}",
                sim.name(),
                set.inputs.names(),
                inputs.names()
            )));
        }
        if set.scaling_groups != groups {
            return Err(Error::SchemaMismatch(format!(
                "{} has scaling groups {:?}, expected {:?}",
                sim.name(),
                set.scaling_groups,
                groups
            )));
        }
        inputs.append(&set.inputs)?;
        labels.extend_from_slice(&set.labels);
        raw_labels.extend_from_slice(&set.raw_labels);
        oracle_labels.extend_from_slice(&set.oracle_labels);
        num_flows.extend(std::iter::repeat(sim.total_flows()).take(set.labels.len()));
        num_sims += 1;
    }

    fill_unknowns(&mut inputs)?;
    let (inputs, params) = scale_features(&inputs, &groups, mode)?;
    let dataset = Dataset::new(inputs, labels, raw_labels, oracle_labels, num_flows)?;
    info!(
        "Assembled {} examples with {} features from {num_sims} simulations",
        dataset.len(),
        dataset.inputs().num_columns()
    );
    Ok((dataset, params))
}

/// Load scratch example sets, remove the scratch files (even when a read
/// fails), and assemble.
///
/// # Errors
///
/// Returns error if a scratch file cannot be read, or as [`assemble`].
pub fn assemble_from_handles(
    handles: &[ScratchHandle],
    mode: ScalingMode,
) -> Result<(Dataset, ScaleParams)> {
    let parts: Result<Vec<_>> = handles
        .iter()
        .map(|handle| Ok((handle.simulation.clone(), storage::read_examples(&handle.path)?)))
        .collect();
    ingest::remove_scratch(handles);
    assemble(parts?, mode)
}

/// Replace the unknown sentinel with the mean of the feature's known values.
#[allow(clippy::float_cmp, clippy::cast_precision_loss)]
fn fill_unknowns(inputs: &mut FeatureMatrix) -> Result<()> {
    let names = inputs.names().to_vec();
    let mut unusable = Vec::new();
    for (name, col) in names.iter().zip(inputs.columns_mut()) {
        let (sum, known) = col
            .iter()
            .filter(|&&v| v != UNKNOWN_SENTINEL)
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if known == col.len() {
            continue;
        }
        if known == 0 {
            unusable.push(name.clone());
            continue;
        }
        let mean = sum / known as f64;
        debug!(
            "Feature {name}: replacing {} unknown values with {mean}",
            col.len() - known
        );
        for v in col.iter_mut().filter(|v| **v == UNKNOWN_SENTINEL) {
            *v = mean;
        }
    }
    if unusable.is_empty() {
        Ok(())
    } else {
        Err(Error::UnusableFeatures(unusable))
    }
}

/// Reuse the dataset and scaling parameters in `out_dir`, or build them.
///
/// Both files must exist to be reused; `regen` forces a rebuild. A rebuilt
/// dataset is written back to `out_dir` through [`storage::publish`], so
/// runs sharing `out_dir` never read a half-written artifact.
///
/// # Errors
///
/// Returns error if the artifacts cannot be read or written, or if `build`
/// fails.
pub fn load_or_generate<F>(out_dir: &Path, regen: bool, build: F) -> Result<(Dataset, ScaleParams)>
where
    F: FnOnce() -> Result<(Dataset, ScaleParams)>,
{
    let data_path = out_dir.join(DATA_FILE);
    let params_path = out_dir.join(SCALE_PARAMS_FILE);

    if !regen && data_path.exists() && params_path.exists() {
        info!("Loading data from {}", data_path.display());
        let dataset = storage::read_dataset(&data_path)?;
        let params = ScaleParams::load(&params_path)?;
        return Ok((dataset, params));
    }

    let (dataset, params) = build()?;
    std::fs::create_dir_all(out_dir)?;
    info!("Saving data to {}", data_path.display());
    // Data goes last: a reader that sees it also sees its parameters.
    storage::publish(&params_path, |path| params.save(path))?;
    storage::publish(&data_path, |path| storage::write_dataset(path, &dataset))?;
    Ok((dataset, params))
}
