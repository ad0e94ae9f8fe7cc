//! Artifact storage (Arrow/Parquet)
//!
//! Three artifacts go through this module:
//! - **Scratch** example sets, one per simulation, written by ingestion
//!   workers and read back once by the assembler. Handing files instead of
//!   arrays between workers bounds peak memory under high fan-out.
//! - The **assembled dataset** (`data.parquet`), reused by later runs.
//! - Raw **simulation tables** read by [`crate::simulation::ParquetSimulationLoader`].
//!
//! Layout: one Float64 column per input feature, followed by the label
//! columns. The five arrays stay row-aligned because they are columns of
//! the same record batch. Scaling groups ride along as JSON in the schema
//! metadata.

use crate::dataset::{Dataset, ExampleSet};
use crate::matrix::FeatureMatrix;
use crate::scaling::GroupKey;
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, RecordBatch, UInt32Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Column holding the class label.
pub const LABEL_COLUMN: &str = "class";
/// Column holding the raw (pre-class) label.
pub const RAW_LABEL_COLUMN: &str = "class raw";
/// Column holding the oracle label.
pub const ORACLE_LABEL_COLUMN: &str = "class oracle";
/// Column holding the per-row total flow count (assembled dataset only).
pub const NUM_FLOWS_COLUMN: &str = "num flows";
/// Schema metadata key for the scaling-group vector.
pub const SCALING_GROUPS_KEY: &str = "fairshare.scaling_groups";

const RESERVED: [&str; 4] = [
    LABEL_COLUMN,
    RAW_LABEL_COLUMN,
    ORACLE_LABEL_COLUMN,
    NUM_FLOWS_COLUMN,
];

static STAGING_SEQ: AtomicU64 = AtomicU64::new(0);

/// A tag no other writer uses, in this process or another.
#[must_use]
pub fn unique_tag() -> String {
    format!(
        "{}-{}",
        std::process::id(),
        STAGING_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Write `path` through a hidden sibling file, then rename it into place.
///
/// Readers see either the previous file or the complete new one, never a
/// partial write, even when several runs publish the same path.
///
/// # Errors
///
/// Returns error if `write` fails or the staged file cannot be renamed.
pub fn publish<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&Path) -> Result<()>,
{
    let name = path
        .file_name()
        .map_or_else(|| "artifact".into(), |n| n.to_string_lossy());
    let staged = path.with_file_name(format!(".{name}.{}", unique_tag()));
    if let Err(e) = write(&staged).and_then(|()| Ok(std::fs::rename(&staged, path)?)) {
        if staged.exists() {
            if let Err(cleanup) = std::fs::remove_file(&staged) {
                warn!("Cannot remove {}: {cleanup}", staged.display());
            }
        }
        return Err(e);
    }
    Ok(())
}

/// Write a per-simulation example set.
///
/// # Errors
///
/// Returns error if an input feature uses a reserved column name, the arrays
/// are not aligned, or the file cannot be written.
pub fn write_examples<P: AsRef<Path>>(path: P, set: &ExampleSet) -> Result<()> {
    set.check_aligned()?;
    let mut metadata = HashMap::new();
    metadata.insert(
        SCALING_GROUPS_KEY.to_string(),
        serde_json::to_string(&set.scaling_groups)?,
    );
    let batch = build_batch(
        &set.inputs,
        &set.labels,
        &set.raw_labels,
        &set.oracle_labels,
        None,
        metadata,
    )?;
    write_batch(path.as_ref(), &batch)
}

/// Read an example set written by [`write_examples`].
///
/// # Errors
///
/// Returns error if the file cannot be read or lacks the label columns or
/// scaling-group metadata.
pub fn read_examples<P: AsRef<Path>>(path: P) -> Result<ExampleSet> {
    let (schema, batches) = read_batches(path.as_ref())?;
    let groups = schema.metadata().get(SCALING_GROUPS_KEY).ok_or_else(|| {
        Error::StorageError(format!(
            "{}: missing scaling groups metadata",
            path.as_ref().display()
        ))
    })?;
    let scaling_groups: Vec<GroupKey> = serde_json::from_str(groups)?;
    let set = ExampleSet {
        inputs: input_matrix(&schema, &batches)?,
        labels: u32_column(&batches, LABEL_COLUMN)?,
        raw_labels: f64_column(&batches, RAW_LABEL_COLUMN)?,
        oracle_labels: f64_column(&batches, ORACLE_LABEL_COLUMN)?,
        scaling_groups,
    };
    set.check_aligned()?;
    Ok(set)
}

/// Write the assembled dataset.
///
/// # Errors
///
/// Returns error if an input feature uses a reserved column name or the
/// file cannot be written.
pub fn write_dataset<P: AsRef<Path>>(path: P, dataset: &Dataset) -> Result<()> {
    let batch = build_batch(
        dataset.inputs(),
        dataset.labels(),
        dataset.raw_labels(),
        dataset.oracle_labels(),
        Some(dataset.num_flows()),
        HashMap::new(),
    )?;
    write_batch(path.as_ref(), &batch)
}

/// Read a dataset written by [`write_dataset`].
///
/// # Errors
///
/// Returns error if the file cannot be read or lacks a required column.
pub fn read_dataset<P: AsRef<Path>>(path: P) -> Result<Dataset> {
    let (schema, batches) = read_batches(path.as_ref())?;
    Dataset::new(
        input_matrix(&schema, &batches)?,
        u32_column(&batches, LABEL_COLUMN)?,
        f64_column(&batches, RAW_LABEL_COLUMN)?,
        f64_column(&batches, ORACLE_LABEL_COLUMN)?,
        u32_column(&batches, NUM_FLOWS_COLUMN)?,
    )
}

/// Read every numeric column of a Parquet file as `f64`.
///
/// Nulls become NaN so that downstream validity checks reject them.
///
/// # Errors
///
/// Returns error if the file cannot be read.
pub fn read_numeric_table<P: AsRef<Path>>(path: P) -> Result<FeatureMatrix> {
    let (schema, batches) = read_batches(path.as_ref())?;
    let names: Vec<String> = schema
        .fields()
        .iter()
        .filter(|f| f.data_type().is_numeric())
        .map(|f| f.name().clone())
        .collect();
    let columns = names
        .iter()
        .map(|name| f64_column(&batches, name))
        .collect::<Result<Vec<_>>>()?;
    FeatureMatrix::new(names, columns)
}

fn build_batch(
    inputs: &FeatureMatrix,
    labels: &[u32],
    raw_labels: &[f64],
    oracle_labels: &[f64],
    num_flows: Option<&[u32]>,
    metadata: HashMap<String, String>,
) -> Result<RecordBatch> {
    if let Some(name) = inputs.names().iter().find(|n| RESERVED.contains(&n.as_str())) {
        return Err(Error::InvalidInput(format!(
            "Input feature uses a reserved column name: {name}"
        )));
    }

    let mut fields: Vec<Field> = inputs
        .names()
        .iter()
        .map(|name| Field::new(name, DataType::Float64, false))
        .collect();
    let mut arrays: Vec<ArrayRef> = inputs
        .columns()
        .iter()
        .map(|col| Arc::new(Float64Array::from(col.clone())) as ArrayRef)
        .collect();

    fields.push(Field::new(LABEL_COLUMN, DataType::UInt32, false));
    arrays.push(Arc::new(UInt32Array::from(labels.to_vec())));
    fields.push(Field::new(RAW_LABEL_COLUMN, DataType::Float64, false));
    arrays.push(Arc::new(Float64Array::from(raw_labels.to_vec())));
    fields.push(Field::new(ORACLE_LABEL_COLUMN, DataType::Float64, false));
    arrays.push(Arc::new(Float64Array::from(oracle_labels.to_vec())));
    if let Some(num_flows) = num_flows {
        fields.push(Field::new(NUM_FLOWS_COLUMN, DataType::UInt32, false));
        arrays.push(Arc::new(UInt32Array::from(num_flows.to_vec())));
    }

    let schema = Arc::new(Schema::new(fields).with_metadata(metadata));
    Ok(RecordBatch::try_new(schema, arrays)?)
}

fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    let file = File::create(path).map_err(|e| {
        Error::StorageError(format!("Failed to create {}: {e}", path.display()))
    })?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None)?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

fn read_batches(path: &Path) -> Result<(SchemaRef, Vec<RecordBatch>)> {
    let file = File::open(path).map_err(|e| {
        Error::StorageError(format!("Failed to open Parquet file {}: {e}", path.display()))
    })?;

    let builder = ParquetRecordBatchReaderBuilder::try_new(file).map_err(|e| {
        Error::StorageError(format!("Failed to parse Parquet file {}: {e}", path.display()))
    })?;
    let schema = builder.schema().clone();

    let reader = builder.build().map_err(|e| {
        Error::StorageError(format!("Failed to create Parquet reader: {e}"))
    })?;

    let mut batches = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| {
            Error::StorageError(format!("Failed to read record batch: {e}"))
        })?;
        batches.push(batch);
    }

    Ok((schema, batches))
}

fn input_matrix(schema: &Schema, batches: &[RecordBatch]) -> Result<FeatureMatrix> {
    let names: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .filter(|name| !RESERVED.contains(&name.as_str()))
        .collect();
    let columns = names
        .iter()
        .map(|name| f64_column(batches, name))
        .collect::<Result<Vec<_>>>()?;
    FeatureMatrix::new(names, columns)
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a ArrayRef> {
    batch
        .column_by_name(name)
        .ok_or_else(|| Error::StorageError(format!("Missing column: {name}")))
}

fn f64_column(batches: &[RecordBatch], name: &str) -> Result<Vec<f64>> {
    let mut values = Vec::new();
    for batch in batches {
        let array = cast(column(batch, name)?.as_ref(), &DataType::Float64)?;
        let array = array
            .as_any()
            .downcast_ref::<Float64Array>()
            .ok_or_else(|| Error::StorageError(format!("Column {name} is not Float64")))?;
        values.extend(array.iter().map(|v| v.unwrap_or(f64::NAN)));
    }
    Ok(values)
}

fn u32_column(batches: &[RecordBatch], name: &str) -> Result<Vec<u32>> {
    let mut values = Vec::new();
    for batch in batches {
        let array = cast(column(batch, name)?.as_ref(), &DataType::UInt32)?;
        let array = array
            .as_any()
            .downcast_ref::<UInt32Array>()
            .ok_or_else(|| Error::StorageError(format!("Column {name} is not UInt32")))?;
        if array.null_count() > 0 {
            return Err(Error::StorageError(format!("Column {name} contains nulls")));
        }
        values.extend_from_slice(array.values());
    }
    Ok(values)
}
