//! Simulation ingestion
//!
//! Each simulation is turned into a labeled [`ExampleSet`] independently:
//!
//! 1. load through the [`SimulationLoader`]
//! 2. drop the warmup rows
//! 3. split off the input, output and oracle columns
//! 4. label the outputs with the model's transform
//! 5. discard the simulation if any input or output value is not finite
//! 6. fail if a label is outside `[0, num_classes)`
//! 7. subsample with replacement
//! 8. write the result to a scratch Parquet file
//!
//! Only a small [`ScratchHandle`] travels back from a worker. Problems with
//! one simulation's data discard that simulation; a bad label aborts the
//! whole build since it points at a labeling bug rather than bad input.

use crate::dataset::ExampleSet;
use crate::model::Model;
use crate::pool::WorkerPool;
use crate::simulation::{Simulation, SimulationLoader};
use crate::{storage, Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Per-simulation processing options.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOptions {
    /// Percentage of leading rows to drop.
    pub warmup_percent: f64,
    /// Percentage of rows to keep (sampled with replacement).
    pub keep_percent: f64,
    /// Directory for scratch files.
    pub scratch_dir: PathBuf,
    /// Base seed; simulation `i` subsamples with `seed + i`.
    pub seed: u64,
}

/// Where a processed simulation's examples were written.
#[derive(Debug, Clone, PartialEq)]
pub struct ScratchHandle {
    /// Scratch Parquet file.
    pub path: PathBuf,
    /// The simulation's record.
    pub simulation: Simulation,
    /// Number of examples in the file.
    pub rows: usize,
}

/// Number of rows dropped as warmup: `floor(rows * percent / 100)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn warmup_rows(rows: usize, warmup_percent: f64) -> usize {
    ((rows as f64 * warmup_percent / 100.0).floor() as usize).min(rows)
}

/// Number of rows kept: `ceil(rows * percent / 100)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn keep_rows(rows: usize, keep_percent: f64) -> usize {
    (rows as f64 * keep_percent / 100.0).ceil() as usize
}

/// Scratch file for the `index`-th simulation source. The index keeps
/// same-named sources from different directories apart.
#[must_use]
pub fn scratch_path(scratch_dir: &Path, index: usize, source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map_or_else(|| "simulation".into(), |s| s.to_string_lossy());
    scratch_dir.join(format!("{index}-{stem}_tmp.parquet"))
}

/// Delete the scratch files behind `handles`, warning on failure.
pub fn remove_scratch(handles: &[ScratchHandle]) {
    for handle in handles {
        if let Err(e) = std::fs::remove_file(&handle.path) {
            warn!("Failed to remove scratch file {}: {e}", handle.path.display());
        }
    }
}

/// Process one simulation.
///
/// `index` is the simulation's position in the run and selects its
/// subsampling seed. Returns `Ok(None)` when the simulation is discarded.
///
/// # Errors
///
/// Returns `LabelOutOfRange` for an invalid label, or an error if the
/// scratch file cannot be written.
pub fn process_simulation(
    index: usize,
    source: &Path,
    loader: &dyn SimulationLoader,
    model: &dyn Model,
    options: &IngestOptions,
) -> Result<Option<ScratchHandle>> {
    let (sim, table) = match loader.load(source) {
        Ok(loaded) => loaded,
        Err(e) => {
            warn!("Discarding {}: failed to load: {e:#}", source.display());
            return Ok(None);
        }
    };

    let total = table.num_rows();
    let skip = warmup_rows(total, options.warmup_percent);
    let table = table.slice_rows(skip..total);
    let rows = table.num_rows();
    if rows == 0 {
        warn!("Discarding {}: no rows after warmup", sim.name());
        return Ok(None);
    }

    let spec = model.spec();
    let split = table.select_columns(&spec.in_spec).and_then(|inputs| {
        let outputs = table.select_columns(&spec.out_spec)?;
        let oracle = table
            .column_by_name(&spec.oracle_feature)
            .ok_or_else(|| Error::InvalidInput(format!("Missing column: {}", spec.oracle_feature)))?
            .to_vec();
        Ok((inputs, outputs, oracle))
    });
    let (inputs, outputs, oracle_labels) = match split {
        Ok(split) => split,
        Err(e) => {
            warn!("Discarding {}: {e}", sim.name());
            return Ok(None);
        }
    };

    let labeled = match model.transform(&sim, &outputs) {
        Ok(labeled) => labeled,
        Err(e) => {
            warn!("Discarding {}: {e}", sim.name());
            return Ok(None);
        }
    };

    if let Some(feature) = inputs.first_non_finite().or_else(|| outputs.first_non_finite()) {
        warn!("Discarding {}: feature \"{feature}\" has non-finite values", sim.name());
        return Ok(None);
    }

    let labels = checked_labels(&sim, &labeled.labels, spec.num_classes)?;

    let keep = keep_rows(rows, options.keep_percent);
    let mut rng = StdRng::seed_from_u64(options.seed.wrapping_add(index as u64));
    let picks: Vec<usize> = (0..keep).map(|_| rng.gen_range(0..rows)).collect();
    debug!("{}: keeping {keep} of {rows} rows", sim.name());

    let set = ExampleSet {
        inputs,
        labels,
        raw_labels: labeled.raw_labels,
        oracle_labels,
        scaling_groups: spec.scaling_groups(),
    }
    .select_rows(&picks);

    let path = scratch_path(&options.scratch_dir, index, source);
    storage::write_examples(&path, &set)?;
    Ok(Some(ScratchHandle {
        path,
        simulation: sim,
        rows: set.num_rows(),
    }))
}

fn checked_labels(sim: &Simulation, labels: &[i64], num_classes: usize) -> Result<Vec<u32>> {
    labels
        .iter()
        .map(|&class| {
            u32::try_from(class)
                .ok()
                .filter(|&c| (c as usize) < num_classes)
                .ok_or_else(|| Error::LabelOutOfRange {
                    simulation: sim.name().to_string(),
                    class,
                    num_classes,
                })
        })
        .collect()
}

/// Process every simulation on `pool` and return the usable ones.
///
/// # Errors
///
/// Returns the first fatal per-simulation error, after deleting the scratch
/// files already written, or `NoUsableSimulations` if every simulation was
/// discarded.
pub fn ingest(
    sources: &[PathBuf],
    loader: &dyn SimulationLoader,
    model: &dyn Model,
    options: &IngestOptions,
    pool: &WorkerPool,
) -> Result<Vec<ScratchHandle>> {
    std::fs::create_dir_all(&options.scratch_dir)?;
    info!("Ingesting {} simulations", sources.len());

    let jobs: Vec<(usize, &PathBuf)> = sources.iter().enumerate().collect();
    let results = pool.map(jobs, |(idx, source)| {
        process_simulation(idx, source, loader, model, options)
    });

    let mut handles = Vec::with_capacity(results.len());
    let mut fatal = None;
    for result in results {
        match result {
            Ok(Some(handle)) => handles.push(handle),
            Ok(None) => {}
            Err(e) => {
                fatal.get_or_insert(e);
            }
        }
    }
    if let Some(e) = fatal {
        remove_scratch(&handles);
        if let Err(cleanup) = std::fs::remove_dir(&options.scratch_dir) {
            debug!("Kept scratch dir {}: {cleanup}", options.scratch_dir.display());
        }
        return Err(e);
    }
    let discarded = sources.len() - handles.len();
    info!("Discarded {discarded} simulations");
    if handles.is_empty() {
        return Err(Error::NoUsableSimulations { discarded });
    }
    Ok(handles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::FeatureMatrix;
    use crate::model::{FeatureSpec, ModelKind, ModelParams};

    struct TableLoader(FeatureMatrix);

    impl SimulationLoader for TableLoader {
        fn load(&self, path: &Path) -> anyhow::Result<(Simulation, FeatureMatrix)> {
            let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if name.starts_with("broken") {
                anyhow::bail!("corrupt simulation");
            }
            Ok((Simulation::from_name(name)?, self.0.clone()))
        }
    }

    fn spec() -> FeatureSpec {
        FeatureSpec {
            in_spec: vec!["a".to_string(), "b".to_string()],
            out_spec: vec!["share".to_string()],
            oracle_feature: "oracle".to_string(),
            num_classes: 5,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn table(rows: usize) -> FeatureMatrix {
        let col = |f: f64| (0..rows).map(|i| i as f64 * f).collect::<Vec<_>>();
        FeatureMatrix::new(
            vec![
                "a".to_string(),
                "b".to_string(),
                "share".to_string(),
                "oracle".to_string(),
            ],
            vec![col(1.0), col(2.0), vec![0.5; rows], vec![2.0; rows]],
        )
        .unwrap()
    }

    fn options(dir: &Path) -> IngestOptions {
        IngestOptions {
            warmup_percent: 10.0,
            keep_percent: 50.0,
            scratch_dir: dir.to_path_buf(),
            seed: 1337,
        }
    }

    fn model() -> Box<dyn Model> {
        ModelKind::SoftmaxRegression.build(spec(), 2, ModelParams::default(), 0)
    }

    #[test]
    fn test_row_counts() {
        assert_eq!(warmup_rows(1000, 10.0), 100);
        assert_eq!(warmup_rows(15, 10.0), 1);
        assert_eq!(keep_rows(900, 50.0), 450);
        assert_eq!(keep_rows(5, 50.0), 3);
    }

    #[test]
    fn test_process_simulation_warmup_and_keep() {
        let dir = tempfile::tempdir().unwrap();
        let loader = TableLoader(table(1000));
        let handle = process_simulation(
            0,
            Path::new("1unfair-1other.parquet"),
            &loader,
            model().as_ref(),
            &options(dir.path()),
        )
        .unwrap()
        .unwrap();

        assert_eq!(handle.rows, 450);
        assert_eq!(handle.path, dir.path().join("0-1unfair-1other_tmp.parquet"));
        let set = storage::read_examples(&handle.path).unwrap();
        assert_eq!(set.num_rows(), 450);
        // Share 0.5 of 2 flows is exactly fair.
        assert!(set.labels.iter().all(|&l| l == 2));
        // Warmup rows never come back.
        assert!(set.inputs.column(0).iter().all(|&v| v >= 100.0));
        // Inputs stay paired with each other.
        for (a, b) in set.inputs.column(0).iter().zip(set.inputs.column(1)) {
            assert!((b - 2.0 * a).abs() < 1e-9);
        }
    }

    #[test]
    fn test_subsampling_is_seeded() {
        let dir = tempfile::tempdir().unwrap();
        let loader = TableLoader(table(200));
        let model = model();
        let run = || {
            let handle = process_simulation(
                3,
                Path::new("1unfair-3other"),
                &loader,
                model.as_ref(),
                &options(dir.path()),
            )
            .unwrap()
            .unwrap();
            storage::read_examples(handle.path).unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_discards_bad_simulations() {
        let dir = tempfile::tempdir().unwrap();
        let model = model();
        let opts = options(dir.path());

        let broken = TableLoader(table(10));
        assert!(process_simulation(0, Path::new("broken"), &broken, model.as_ref(), &opts)
            .unwrap()
            .is_none());

        let mut nan = table(10);
        nan.columns_mut()[1][5] = f64::NAN;
        let nan = TableLoader(nan);
        assert!(process_simulation(0, Path::new("1unfair-1other"), &nan, model.as_ref(), &opts)
            .unwrap()
            .is_none());

        let missing = TableLoader(table(10).select_columns(&["a".to_string()]).unwrap());
        assert!(
            process_simulation(0, Path::new("1unfair-1other"), &missing, model.as_ref(), &opts)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_label_out_of_range_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let narrow = FeatureSpec {
            num_classes: 2,
            ..spec()
        };
        let model = ModelKind::SoftmaxRegression.build(narrow, 2, ModelParams::default(), 0);
        let err = process_simulation(
            0,
            Path::new("1unfair-1other"),
            &TableLoader(table(10)),
            model.as_ref(),
            &options(dir.path()),
        )
        .unwrap_err();
        assert!(matches!(err, Error::LabelOutOfRange { class: 2, .. }));
    }

    #[test]
    fn test_ingest_counts_discards() {
        let dir = tempfile::tempdir().unwrap();
        let model = model();
        let loader = TableLoader(table(50));
        let pool = WorkerPool::new(false, 2).unwrap();
        let sources = vec![
            PathBuf::from("1unfair-1other"),
            PathBuf::from("broken-1"),
            PathBuf::from("1unfair-2other"),
        ];
        let handles =
            ingest(&sources, &loader, model.as_ref(), &options(dir.path()), &pool).unwrap();
        assert_eq!(handles.len(), 2);

        let err = ingest(
            &[PathBuf::from("broken-2")],
            &loader,
            model.as_ref(),
            &options(dir.path()),
            &pool,
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoUsableSimulations { discarded: 1 }));
    }

    #[test]
    fn test_uneven_row_count_keeps_from_remaining_rows() {
        // Warmup drops floor(2.1) = 2 rows; keep samples ceil(19 * 0.5) = 10.
        assert_eq!(warmup_rows(21, 10.0), 2);
        assert_eq!(keep_rows(21 - 2, 50.0), 10);

        let dir = tempfile::tempdir().unwrap();
        let handle = process_simulation(
            0,
            Path::new("1unfair-1other"),
            &TableLoader(table(21)),
            model().as_ref(),
            &options(dir.path()),
        )
        .unwrap()
        .unwrap();
        assert_eq!(handle.rows, 10);
        let set = storage::read_examples(&handle.path).unwrap();
        assert!(set.inputs.column(0).iter().all(|&v| v >= 2.0));
    }

    #[test]
    fn test_same_stem_sources_get_distinct_scratch_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = Path::new("/runs/a/1unfair-1other.parquet");
        let b = Path::new("/runs/b/1unfair-1other.parquet");
        assert_ne!(scratch_path(dir.path(), 0, a), scratch_path(dir.path(), 1, b));

        let model = model();
        let pool = WorkerPool::new(false, 2).unwrap();
        let sources = vec![a.to_path_buf(), b.to_path_buf()];
        let handles =
            ingest(&sources, &TableLoader(table(30)), model.as_ref(), &options(dir.path()), &pool)
                .unwrap();
        assert_eq!(handles.len(), 2);
        assert_ne!(handles[0].path, handles[1].path);
        for handle in &handles {
            assert_eq!(storage::read_examples(&handle.path).unwrap().num_rows(), handle.rows);
        }
    }

    #[test]
    fn test_fatal_label_removes_written_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let scratch = dir.path().join("scratch");
        let narrow = FeatureSpec {
            num_classes: 3,
            ..spec()
        };
        let model = ModelKind::SoftmaxRegression.build(narrow, 2, ModelParams::default(), 0);
        // A lone flow holding half the link is labeled 4, past the last class.
        let sources = vec![
            PathBuf::from("1unfair-1other"),
            PathBuf::from("1unfair-3other"),
            PathBuf::from("1unfair-0other"),
        ];
        let opts = IngestOptions {
            scratch_dir: scratch.clone(),
            ..options(dir.path())
        };

        for sync in [true, false] {
            let pool = WorkerPool::new(sync, 2).unwrap();
            let err = ingest(&sources, &TableLoader(table(40)), model.as_ref(), &opts, &pool)
                .unwrap_err();
            assert!(matches!(err, Error::LabelOutOfRange { class: 4, .. }));
            assert!(!scratch.exists());
        }
    }
}
