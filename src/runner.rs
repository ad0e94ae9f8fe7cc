//! Configuration runs and sweeps
//!
//! [`run_config`] takes one [`RunConfig`] from raw simulations to a scored
//! configuration:
//!
//! 1. reuse `data.parquet` + `scale_params.json` from `out_dir`, or ingest
//!    and assemble them
//! 2. run trials, each with a fresh split and a fresh model
//! 3. write `<config id>.trials.json` next to `<config id>.model.json`
//!
//! [`run_configs`] evaluates many configurations on a bounded outer pool.
//! Every output path is derived from the configuration identifier, so
//! concurrent configurations never write the same model file. Scratch files
//! live in a per-run directory, and the shared dataset artifacts are
//! published atomically.

use crate::config::RunConfig;
use crate::dataset::{self, Dataset};
use crate::ingest::{self, IngestOptions};
use crate::model::{FeatureSpec, ModelKind};
use crate::pool::WorkerPool;
use crate::scaling::ScaleParams;
use crate::simulation::{discover_simulations, SimulationLoader};
use crate::tracking::{
    AttemptRecord, CheckpointRecord, MetricPoint, SweepRecord, TrackingStore,
};
use crate::train::{self, TrainReport};
use crate::trial::{run_trials, TrialOutcome, TrialSummary};
use crate::{storage, Error, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

/// Configurations evaluated at once by [`run_configs`].
pub const SWEEP_PARALLELISM: usize = 3;

/// Run every trial of one configuration.
///
/// # Errors
///
/// Returns error if the dataset cannot be loaded or built, or if an attempt
/// fails for a reason other than a degenerate model.
pub fn run_config(cfg: &RunConfig, loader: &dyn SimulationLoader) -> Result<TrialSummary> {
    cfg.validate()?;
    std::fs::create_dir_all(&cfg.out_dir)?;
    let model_path = cfg.model_path();
    if model_path.exists() {
        debug!("Removing stale model {}", model_path.display());
        std::fs::remove_file(&model_path)?;
    }

    let seed = if cfg.no_rand { cfg.seed } else { rand::random() };
    let kind = cfg.model_kind()?;
    let spec = cfg.feature_spec()?;
    info!("Configuration {} (model {}, seed {seed})", cfg.identifier(), kind.name());

    let (dataset, _) = dataset::load_or_generate(&cfg.out_dir, cfg.regen_data, || {
        build_dataset(cfg, loader, kind, &spec, seed)
    })?;
    log_class_distribution(&dataset, spec.num_classes);

    let config_json = serde_json::to_value(cfg)?;
    let mut store = TrackingStore::new(SweepRecord::new(cfg.identifier(), config_json));

    let summary = run_trials(cfg.trial_policy(), |index| {
        let mut record = AttemptRecord::new(cfg.identifier(), index);
        record.start();
        let result = run_attempt(cfg, kind, &spec, &dataset, seed.wrapping_add(index as u64));
        let outcome = match result {
            Ok((report, accuracy)) => {
                record_history(&mut store, &record, &report);
                record.set_stop_reason(report.stop_reason);
                if model_path.exists() {
                    match CheckpointRecord::from_file(record.attempt_id(), &model_path) {
                        Ok(checkpoint) => store.add_checkpoint(checkpoint),
                        Err(e) => warn!("Cannot hash {}: {e}", model_path.display()),
                    }
                }
                let outcome =
                    TrialOutcome::from_result(accuracy, report.duration, report.diverged_model());
                match outcome {
                    TrialOutcome::Completed { accuracy, duration } => {
                        record.complete(accuracy, duration);
                    }
                    TrialOutcome::Degenerate => record.mark_degenerate(accuracy),
                }
                Ok(outcome)
            }
            Err(e) => {
                record.fail();
                Err(e)
            }
        };
        store.add_attempt(record);
        outcome
    });

    store.save(cfg.trials_path())?;
    summary
}

/// Evaluate `configs`, at most [`SWEEP_PARALLELISM`] at a time.
///
/// When the sweep runs in parallel each configuration ingests its
/// simulations synchronously. A configuration without usable simulations
/// scores as [`TrialSummary::NotTrainable`]. Results keep the input order.
///
/// # Errors
///
/// Returns the first error of any other kind.
pub fn run_configs(
    configs: &[RunConfig],
    sync: bool,
    loader: &dyn SimulationLoader,
) -> Result<Vec<TrialSummary>> {
    let pool = WorkerPool::new(sync, SWEEP_PARALLELISM)?;
    let force_sync = !pool.is_sync();
    info!("Evaluating {} configurations", configs.len());

    let results = pool.map(configs.iter().collect::<Vec<_>>(), |cfg| {
        let cfg = if force_sync && !cfg.sync {
            RunConfig {
                sync: true,
                ..cfg.clone()
            }
        } else {
            cfg.clone()
        };
        match run_config(&cfg, loader) {
            Err(Error::NoUsableSimulations { discarded }) => {
                warn!(
                    "Configuration {} has no usable simulations ({discarded} discarded)",
                    cfg.identifier()
                );
                Ok(TrialSummary::NotTrainable { attempts: 0 })
            }
            other => other,
        }
    });
    results.into_iter().collect()
}

fn build_dataset(
    cfg: &RunConfig,
    loader: &dyn SimulationLoader,
    kind: ModelKind,
    spec: &FeatureSpec,
    seed: u64,
) -> Result<(Dataset, ScaleParams)> {
    let sources = discover_simulations(&cfg.data_dir, &cfg.sims, cfg.num_sims, seed)?;
    // Only the transform is needed here; the trained models are built per trial.
    let labeler = kind.build(spec.clone(), spec.in_spec.len(), cfg.model_params(), seed);
    // Identical configurations in one sweep still get separate scratch dirs.
    let options = IngestOptions {
        warmup_percent: cfg.warmup_percent,
        keep_percent: cfg.keep_percent,
        scratch_dir: cfg.scratch_dir().join(storage::unique_tag()),
        seed,
    };
    let pool = WorkerPool::new(cfg.sync, 0)?;
    let built = ingest::ingest(&sources, loader, labeler.as_ref(), &options, &pool)
        .and_then(|handles| dataset::assemble_from_handles(&handles, cfg.standardize.into()));
    // Only the run's own dir goes; the shared parents may be in use.
    if let Err(e) = std::fs::remove_dir(&options.scratch_dir) {
        debug!("Kept scratch dir {}: {e}", options.scratch_dir.display());
    }
    built
}

fn run_attempt(
    cfg: &RunConfig,
    kind: ModelKind,
    spec: &FeatureSpec,
    dataset: &Dataset,
    seed: u64,
) -> Result<(TrainReport, f64)> {
    let mut rng = StdRng::seed_from_u64(seed);
    let split = dataset::split::split(dataset, cfg.early_stop, &mut rng);
    let mut model = kind.build(
        spec.clone(),
        dataset.inputs().num_columns(),
        cfg.model_params(),
        seed,
    );
    let report = train::train(model.as_mut(), &split.train, &split.val, &cfg.train_options(seed))?;
    let accuracy = train::test(model.as_mut(), &split.test, cfg.test_batch)?;
    Ok((report, accuracy))
}

fn record_history(store: &mut TrackingStore, record: &AttemptRecord, report: &TrainReport) {
    for (key, history) in [("train_loss", &report.train_history), ("val_loss", &report.val_history)] {
        for (step, point) in (0u64..).zip(history) {
            store.add_metric(MetricPoint::new(record.attempt_id(), key, step, point.loss));
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn log_class_distribution(dataset: &Dataset, num_classes: usize) {
    let mut counts = vec![0usize; num_classes];
    for &label in dataset.labels() {
        if let Some(count) = counts.get_mut(label as usize) {
            *count += 1;
        }
    }
    let total = dataset.len().max(1) as f64;
    for (class, count) in counts.iter().enumerate() {
        info!(
            "Class {class}: {count} examples ({:.2}%)",
            *count as f64 / total * 100.0
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::FeatureMatrix;
    use crate::simulation::Simulation;
    use std::path::Path;

    struct EmptyLoader;

    impl SimulationLoader for EmptyLoader {
        fn load(&self, _path: &Path) -> anyhow::Result<(Simulation, FeatureMatrix)> {
            anyhow::bail!("no data")
        }
    }

    fn config(dir: &Path) -> RunConfig {
        RunConfig {
            data_dir: dir.join("data"),
            out_dir: dir.join("out"),
            no_rand: true,
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_sweep_degrades_unusable_data() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        std::fs::create_dir_all(&cfg.data_dir).unwrap();
        std::fs::write(cfg.data_dir.join("1unfair-1other.parquet"), b"").unwrap();

        let summaries = run_configs(&[cfg.clone(), cfg], false, &EmptyLoader).unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries
            .iter()
            .all(|s| matches!(s, TrialSummary::NotTrainable { .. })));
    }

    #[test]
    fn test_single_run_reports_no_usable_simulations() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RunConfig {
            sync: true,
            ..config(dir.path())
        };
        std::fs::create_dir_all(&cfg.data_dir).unwrap();
        std::fs::write(cfg.data_dir.join("1unfair-1other.parquet"), b"").unwrap();

        let err = run_config(&cfg, &EmptyLoader).unwrap_err();
        assert!(matches!(err, Error::NoUsableSimulations { discarded: 1 }));
    }

    #[test]
    fn test_stale_model_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = RunConfig {
            sync: true,
            ..config(dir.path())
        };
        std::fs::create_dir_all(&cfg.data_dir).unwrap();
        std::fs::create_dir_all(&cfg.out_dir).unwrap();
        std::fs::write(cfg.model_path(), b"stale").unwrap();

        assert!(run_config(&cfg, &EmptyLoader).is_err());
        assert!(!cfg.model_path().exists());
    }
}
