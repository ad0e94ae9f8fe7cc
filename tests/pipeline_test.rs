//! End-to-end pipeline tests
//!
//! Builds a small directory of synthetic simulations as Parquet files and
//! runs complete configurations over it:
//! 1. ingest and assemble the dataset (with warmup, keep and discards)
//! 2. reuse the persisted artifacts on the next run
//! 3. train, test and record trials
//! 4. sweep several configurations in parallel

use arrow::array::{ArrayRef, Float64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use fairshare::config::RunConfig;
use fairshare::dataset::{DATA_FILE, SCALE_PARAMS_FILE};
use fairshare::model::fairness::ORACLE_FEATURE;
use fairshare::model::FeatureSpec;
use fairshare::runner::{run_config, run_configs};
use fairshare::scaling::ScaleParams;
use fairshare::simulation::ParquetSimulationLoader;
use fairshare::tracking::{AttemptStatus, TrackingStore};
use fairshare::trial::TrialSummary;
use fairshare::{storage, Error};
use parquet::arrow::ArrowWriter;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const ROWS: usize = 200;

// Shares of a 4-flow bottleneck (fair share 0.25), one per class 0..=4.
const SHARES: [f64; 5] = [0.5, 0.3, 0.25, 0.2, 0.05];

/// Write one simulation whose inputs are informative about the class.
#[allow(clippy::cast_precision_loss)]
fn write_simulation(dir: &Path, name: &str, poison: bool) -> PathBuf {
    let spec = FeatureSpec::fairness();
    let classes: Vec<usize> = (0..ROWS).map(|i| i % SHARES.len()).collect();

    let mut fields = Vec::new();
    let mut arrays: Vec<ArrayRef> = Vec::new();
    for (j, feature) in spec.in_spec.iter().enumerate() {
        let values: Vec<f64> = classes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                if poison && i == 7 {
                    f64::NAN
                } else {
                    c as f64 * (j + 1) as f64 + ((i * 7) % 13) as f64 / 100.0
                }
            })
            .collect();
        fields.push(Field::new(feature, DataType::Float64, false));
        arrays.push(Arc::new(Float64Array::from(values)));
    }
    fields.push(Field::new(&spec.out_spec[0], DataType::Float64, false));
    arrays.push(Arc::new(Float64Array::from(
        classes.iter().map(|&c| SHARES[c]).collect::<Vec<_>>(),
    )));
    fields.push(Field::new(ORACLE_FEATURE, DataType::Float64, false));
    arrays.push(Arc::new(Float64Array::from(
        classes.iter().map(|&c| c as f64).collect::<Vec<_>>(),
    )));

    let batch = RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap();
    let path = dir.join(format!("{name}.parquet"));
    let mut writer = ArrowWriter::try_new(File::create(&path).unwrap(), batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
    path
}

fn simulation_dir(root: &Path, sims: usize) -> PathBuf {
    let dir = root.join("data");
    std::fs::create_dir_all(&dir).unwrap();
    for i in 0..sims {
        write_simulation(&dir, &format!("{}Mbps-40us-100p-1unfair-3other", 10 + i), false);
    }
    dir
}

fn centroid_config(root: &Path) -> RunConfig {
    RunConfig {
        data_dir: root.join("data"),
        out_dir: root.join("out"),
        model: "centroid".to_string(),
        no_rand: true,
        sync: true,
        ..RunConfig::default()
    }
}

#[test]
fn test_centroid_run_produces_all_artifacts() {
    let root = tempfile::tempdir().unwrap();
    simulation_dir(root.path(), 3);
    let cfg = centroid_config(root.path());

    let summary = run_config(&cfg, &ParquetSimulationLoader).unwrap();
    let TrialSummary::Best { error, attempts, .. } = summary else {
        panic!("expected a trainable configuration, got {summary:?}");
    };
    assert!(error < 0.5, "error {error}");
    assert_eq!(attempts, 1);

    assert!(cfg.out_dir.join(DATA_FILE).exists());
    assert!(cfg.model_path().exists());
    let params = ScaleParams::load(cfg.out_dir.join(SCALE_PARAMS_FILE)).unwrap();
    assert_eq!(params.len(), FeatureSpec::fairness().in_spec.len());

    let dataset = storage::read_dataset(cfg.out_dir.join(DATA_FILE)).unwrap();
    assert_eq!(dataset.len(), 3 * ROWS);
    assert!(dataset.num_flows().iter().all(|&n| n == 4));
    assert!(dataset.labels().iter().all(|&c| c < 5));

    let store = TrackingStore::load(cfg.trials_path()).unwrap();
    assert_eq!(store.sweep().sweep_id(), cfg.identifier());
    assert_eq!(store.attempts().len(), 1);
    assert_eq!(
        store.best_attempt().map(|a| a.status()),
        Some(AttemptStatus::Completed)
    );
    assert_eq!(store.checkpoints().len(), 1);
    assert!(store.checkpoints()[0].cas_hash().starts_with("sha256:"));

    // Scratch files are gone once the dataset is assembled.
    assert_eq!(std::fs::read_dir(cfg.scratch_dir()).unwrap().count(), 0);
}

#[test]
fn test_warmup_and_keep_shape_the_dataset() {
    let root = tempfile::tempdir().unwrap();
    simulation_dir(root.path(), 2);
    let cfg = RunConfig {
        warmup_percent: 10.0,
        keep_percent: 50.0,
        ..centroid_config(root.path())
    };

    run_config(&cfg, &ParquetSimulationLoader).unwrap();
    let dataset = storage::read_dataset(cfg.out_dir.join(DATA_FILE)).unwrap();
    // 200 rows - 20 warmup = 180, half of which are kept.
    assert_eq!(dataset.len(), 2 * 90);
}

#[test]
fn test_invalid_simulations_are_discarded() {
    let root = tempfile::tempdir().unwrap();
    let dir = simulation_dir(root.path(), 2);
    write_simulation(&dir, "10Mbps-40us-100p-2unfair-2other-poisoned", true);
    std::fs::write(dir.join("1unfair-1other-corrupt.parquet"), b"not parquet").unwrap();
    let cfg = centroid_config(root.path());

    run_config(&cfg, &ParquetSimulationLoader).unwrap();
    let dataset = storage::read_dataset(cfg.out_dir.join(DATA_FILE)).unwrap();
    assert_eq!(dataset.len(), 2 * ROWS);
}

#[test]
fn test_persisted_dataset_is_reused() {
    let root = tempfile::tempdir().unwrap();
    let dir = simulation_dir(root.path(), 2);
    let cfg = centroid_config(root.path());
    run_config(&cfg, &ParquetSimulationLoader).unwrap();

    std::fs::remove_dir_all(&dir).unwrap();
    let again = run_config(&cfg, &ParquetSimulationLoader).unwrap();
    assert!(matches!(again, TrialSummary::Best { .. }));

    let regen = RunConfig {
        regen_data: true,
        ..cfg
    };
    assert!(run_config(&regen, &ParquetSimulationLoader).is_err());
}

#[test]
fn test_softmax_with_early_stopping() {
    let root = tempfile::tempdir().unwrap();
    simulation_dir(root.path(), 3);
    let cfg = RunConfig {
        model: "softmax".to_string(),
        early_stop: true,
        val_patience: 3,
        learning_rate: 0.05,
        momentum: 0.5,
        conf_trials: 2,
        timeout_s: 60,
        ..centroid_config(root.path())
    };

    let summary = run_config(&cfg, &ParquetSimulationLoader).unwrap();
    let TrialSummary::Best { accuracies, .. } = &summary else {
        panic!("expected a trainable configuration, got {summary:?}");
    };
    assert_eq!(accuracies.len(), 2);
    assert!(cfg.model_path().exists());

    let store = TrackingStore::load(cfg.trials_path()).unwrap();
    let first = &store.attempts()[0];
    assert!(first.stop_reason().is_some());
    let val_curve = store.metrics_for_attempt(first.attempt_id(), "val_loss");
    assert!(!val_curve.is_empty());
    assert!(val_curve.windows(2).all(|w| w[0].step() < w[1].step()));
}

#[test]
fn test_empty_data_dir_has_no_usable_simulations() {
    let root = tempfile::tempdir().unwrap();
    simulation_dir(root.path(), 0);
    let cfg = centroid_config(root.path());

    let err = run_config(&cfg, &ParquetSimulationLoader).unwrap_err();
    assert!(matches!(err, Error::NoUsableSimulations { discarded: 0 }));
}

#[test]
fn test_parallel_sweep_matches_sync_sweep() {
    let root = tempfile::tempdir().unwrap();
    simulation_dir(root.path(), 2);
    let configs: Vec<RunConfig> = (0..3)
        .map(|i| RunConfig {
            out_dir: root.path().join(format!("out-{i}")),
            sync: false,
            ..centroid_config(root.path())
        })
        .collect();

    let parallel = run_configs(&configs, false, &ParquetSimulationLoader).unwrap();
    let configs: Vec<RunConfig> = configs
        .into_iter()
        .map(|cfg| RunConfig {
            regen_data: true,
            ..cfg
        })
        .collect();
    let sequential = run_configs(&configs, true, &ParquetSimulationLoader).unwrap();

    assert_eq!(parallel.len(), 3);
    let errors = |s: &[TrialSummary]| s.iter().map(|t| t.as_pair().0).collect::<Vec<_>>();
    assert_eq!(errors(&parallel), errors(&sequential));
}

#[test]
fn test_parallel_sweep_shares_one_out_dir() {
    let root = tempfile::tempdir().unwrap();
    simulation_dir(root.path(), 8);
    let out_dir = root.path().join("out");

    for round in 0..5 {
        let configs: Vec<RunConfig> = [10.0, 40.0, 70.0]
            .into_iter()
            .map(|keep_percent| RunConfig {
                keep_percent,
                regen_data: round % 2 == 0,
                sync: false,
                ..centroid_config(root.path())
            })
            .collect();

        let summaries = run_configs(&configs, false, &ParquetSimulationLoader).unwrap();
        assert_eq!(summaries.len(), 3);
        assert!(summaries
            .iter()
            .all(|s| matches!(s, TrialSummary::Best { .. })));
        for cfg in &configs {
            assert!(cfg.model_path().exists());
            assert!(cfg.trials_path().exists());
        }
    }

    for keep_percent in [10.0, 40.0, 70.0] {
        let cfg = RunConfig {
            keep_percent,
            ..centroid_config(root.path())
        };
        assert_eq!(std::fs::read_dir(cfg.scratch_dir()).unwrap().count(), 0);
    }
    let staged: Vec<_> = std::fs::read_dir(&out_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .filter(|name| name.starts_with('.'))
        .collect();
    assert!(staged.is_empty(), "{staged:?}");
    // Whichever configuration published last, the dataset is whole.
    let dataset = storage::read_dataset(out_dir.join(DATA_FILE)).unwrap();
    assert!(!dataset.is_empty());
}
