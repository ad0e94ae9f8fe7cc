//! Training loop controller
//!
//! Drives a [`Model`] through epochs of class-balanced batches with:
//! - periodic loss logging and validation at a per-epoch cadence that does
//!   not depend on the batch size
//! - early stopping on validation loss with patience and a relative
//!   improvement threshold
//! - a two-slot [`Checkpoint`] (live model + best snapshot) with explicit
//!   rollback after a non-improving validation
//! - a wall-clock timeout checked at epoch boundaries
//!
//! Models that are not trained via batches are fitted once instead.

mod checkpoint;

pub use checkpoint::Checkpoint;

use crate::dataset::sampler::{BatchOrder, BatchSampler};
use crate::dataset::Dataset;
use crate::model::{HiddenState, Model};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Maximum epochs when early stopping decides when to stop.
pub const EPOCHS_MAX: usize = 10_000;

/// Training-loop options.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainOptions {
    /// Upper bound on epochs.
    pub epochs: usize,
    /// Training batch size.
    pub train_batch: usize,
    /// Batch size for validation and testing.
    pub test_batch: usize,
    /// Stop on validation loss instead of after a fixed number of epochs.
    pub early_stop: bool,
    /// Non-improving validations tolerated before stopping.
    pub val_patience: usize,
    /// Minimum relative improvement (percent) that counts.
    pub val_improvement_thresh: f64,
    /// Wall-clock budget; `None` disables the timeout.
    pub timeout: Option<Duration>,
    /// Loss log points per epoch (0 disables logging).
    pub logs_per_epoch: usize,
    /// Validations per epoch.
    pub vals_per_epoch: usize,
    /// Seed for batch sampling.
    pub seed: u64,
    /// Where the trained model is persisted.
    pub model_path: Option<PathBuf>,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            epochs: 100,
            train_batch: 10,
            test_batch: 10_000,
            early_stop: false,
            val_patience: 10,
            val_improvement_thresh: 0.1,
            timeout: None,
            logs_per_epoch: 5,
            vals_per_epoch: 15,
            seed: 1337,
            model_path: None,
        }
    }
}

/// Why training ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// Ran all epochs (or fitted a classical model).
    Completed,
    /// Validation loss stopped improving.
    Patience,
    /// Wall-clock budget exceeded.
    Timeout,
    /// Training loss became non-finite.
    Diverged,
}

/// A loss value at a point in training.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossPoint {
    /// Epoch index.
    pub epoch: usize,
    /// Batch index within the epoch.
    pub batch: usize,
    /// Loss value.
    pub loss: f64,
}

/// Summary of a training run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    /// Why training ended.
    pub stop_reason: StopReason,
    /// Epochs started.
    pub epochs_run: usize,
    /// Validation passes performed.
    pub validations: usize,
    /// Best validation loss seen.
    pub best_val_loss: Option<f64>,
    /// Training loss at each log point.
    pub train_history: Vec<LossPoint>,
    /// Validation loss at each validation.
    pub val_history: Vec<LossPoint>,
    /// Training wall-clock time.
    pub duration: Duration,
    /// The best checkpoint was restored into the model at the end.
    pub restored_best: bool,
}

impl TrainReport {
    /// True if the training loss became non-finite.
    #[must_use]
    pub fn diverged(&self) -> bool {
        self.stop_reason == StopReason::Diverged
    }

    /// True if the trained model is the diverged live state, i.e. no
    /// finite best checkpoint replaced it.
    #[must_use]
    pub const fn diverged_model(&self) -> bool {
        matches!(self.stop_reason, StopReason::Diverged) && !self.restored_best
    }
}

/// Batches between two events when `per_epoch` events are wanted.
fn cadence(batches: usize, per_epoch: usize) -> Option<usize> {
    (per_epoch > 0).then(|| batches.div_ceil(per_epoch).max(1))
}

/// Relative improvement of `current` over `best`, in percent.
///
/// A non-positive `best` cannot be improved upon relatively.
#[must_use]
pub fn improvement_percent(best: f64, current: f64) -> f64 {
    if best <= 0.0 {
        0.0
    } else {
        (best - current) / best * 100.0
    }
}

/// Train `model` on `train`, validating on `val` when early stopping.
///
/// After an early-stopped run the best checkpoint is restored into
/// `model`; if no validation ever improved, the final live state is
/// persisted instead so that a model file always exists.
///
/// # Errors
///
/// Returns error if early stopping is requested without validations, or if
/// the model fails or the model file cannot be written.
#[allow(clippy::too_many_lines)]
pub fn train(
    model: &mut dyn Model,
    train: &Dataset,
    val: &Dataset,
    opts: &TrainOptions,
) -> Result<TrainReport> {
    let start = Instant::now();
    let caps = model.capabilities();
    let mut checkpoint = Checkpoint::new(opts.model_path.clone());

    if !caps.trains_via_batches {
        let (inputs, labels) = train.gather(&(0..train.len()).collect::<Vec<_>>());
        info!("Fitting {} on {} examples", model.name(), inputs.len());
        model.fit(&inputs, &labels)?;
        checkpoint.persist(&model.snapshot())?;
        return Ok(TrainReport {
            stop_reason: StopReason::Completed,
            epochs_run: 1,
            validations: 0,
            best_val_loss: None,
            train_history: Vec::new(),
            val_history: Vec::new(),
            duration: start.elapsed(),
            restored_best: false,
        });
    }

    if opts.early_stop && opts.vals_per_epoch == 0 {
        return Err(Error::InvalidInput(
            "Early stopping requires at least one validation per epoch".to_string(),
        ));
    }
    if opts.early_stop && val.is_empty() {
        return Err(Error::InvalidInput(
            "Early stopping requires a non-empty validation set".to_string(),
        ));
    }

    let mut sampler = BatchSampler::new(
        train.labels(),
        opts.train_batch,
        BatchOrder::Balanced,
        opts.seed,
    );
    let num_batches = sampler.num_batches();
    let log_every = cadence(num_batches, opts.logs_per_epoch);
    let val_every = cadence(num_batches, opts.vals_per_epoch).filter(|_| opts.early_stop);
    debug!("{num_batches} batches per epoch, logging every {log_every:?}, validating every {val_every:?}");

    let mut report = TrainReport {
        stop_reason: StopReason::Completed,
        epochs_run: 0,
        validations: 0,
        best_val_loss: None,
        train_history: Vec::new(),
        val_history: Vec::new(),
        duration: Duration::ZERO,
        restored_best: false,
    };
    let mut patience = opts.val_patience;
    model.set_training(true);

    'epochs: for epoch in 0..opts.epochs {
        if let Some(timeout) = opts.timeout {
            if start.elapsed() > timeout {
                info!("Training timed out after {:.2?} ({epoch} epochs)", start.elapsed());
                report.stop_reason = StopReason::Timeout;
                break;
            }
        }
        report.epochs_run += 1;

        for (batch, rows) in sampler.epoch().into_iter().enumerate() {
            let (inputs, labels) = train.gather(&rows);
            let hidden = if caps.requires_hidden_state {
                model.init_hidden(rows.len())
            } else {
                HiddenState::default()
            };
            let forward = model.forward(&inputs, hidden)?;
            let loss = model.loss(&forward, &labels);
            if !loss.is_finite() {
                warn!("Training loss diverged at epoch {epoch}, batch {batch}");
                report.stop_reason = StopReason::Diverged;
                break 'epochs;
            }
            model.step(&inputs, &labels, &forward)?;

            if log_every.is_some_and(|every| batch % every == 0) {
                info!("[epoch {epoch:>3}, batch {batch:>5}] loss: {loss:.8}");
                report.train_history.push(LossPoint { epoch, batch, loss });
            }

            if val_every.is_some_and(|every| batch % every == 0) {
                let val_loss = validation_loss(model, val, opts.test_batch)?;
                report.validations += 1;
                report.val_history.push(LossPoint {
                    epoch,
                    batch,
                    loss: val_loss,
                });

                let best = *report.best_val_loss.get_or_insert(val_loss);
                let improvement = improvement_percent(best, val_loss);
                if improvement > opts.val_improvement_thresh {
                    info!(
                        "Validation loss improved by {improvement:.2}% ({best:.8} -> {val_loss:.8})"
                    );
                    report.best_val_loss = Some(val_loss);
                    patience = opts.val_patience;
                    checkpoint.record(model)?;
                } else {
                    patience = patience.saturating_sub(1);
                    debug!(
                        "Validation loss {val_loss:.8} did not improve on {best:.8}, patience {patience}"
                    );
                    checkpoint.rollback(model)?;
                    if patience == 0 {
                        info!("Stopped early after {} validations", report.validations);
                        report.stop_reason = StopReason::Patience;
                        break 'epochs;
                    }
                }
            }
        }
    }

    if opts.early_stop && checkpoint.rollback(model)? {
        debug!("Restored best model");
        report.restored_best = true;
    } else {
        checkpoint.persist(&model.snapshot())?;
    }
    report.duration = start.elapsed();
    info!(
        "Finished training in {:.2?}: {:?} after {} epochs",
        report.duration, report.stop_reason, report.epochs_run
    );
    Ok(report)
}

/// Sum of per-batch losses over the whole set, in inference mode.
///
/// # Errors
///
/// Returns error if the forward pass fails.
pub fn validation_loss(model: &mut dyn Model, data: &Dataset, batch_size: usize) -> Result<f64> {
    let was_training = model.is_training();
    model.set_training(false);
    let result = evaluate(model, data, batch_size, |m, fwd, labels| m.loss(fwd, labels));
    model.set_training(was_training);
    result
}

/// Accuracy of `model` on `test`, in inference mode.
///
/// The model is switched back to training mode before returning, also when
/// evaluation fails.
///
/// # Errors
///
/// Returns error if the test set is empty or the forward pass fails.
#[allow(clippy::cast_precision_loss)]
pub fn test(model: &mut dyn Model, test: &Dataset, batch_size: usize) -> Result<f64> {
    if test.is_empty() {
        return Err(Error::InvalidInput("Test set is empty".to_string()));
    }
    model.set_training(false);
    let result = evaluate(model, test, batch_size, |_, fwd, labels| {
        fwd.num_correct(labels) as f64
    });
    model.set_training(true);
    let accuracy = result? / test.len() as f64;
    info!("Test accuracy: {:.2}%", accuracy * 100.0);
    Ok(accuracy)
}

fn evaluate<F>(model: &dyn Model, data: &Dataset, batch_size: usize, per_batch: F) -> Result<f64>
where
    F: Fn(&dyn Model, &crate::model::Forward, &[u32]) -> f64,
{
    let needs_hidden = model.capabilities().requires_hidden_state;
    let mut sampler = BatchSampler::new(data.labels(), batch_size, BatchOrder::Sequential, 0);
    let mut total = 0.0;
    for rows in sampler.epoch() {
        let (inputs, labels) = data.gather(&rows);
        let hidden = if needs_hidden {
            model.init_hidden(rows.len())
        } else {
            HiddenState::default()
        };
        let forward = model.forward(&inputs, hidden)?;
        total += per_batch(model, &forward, &labels);
    }
    Ok(total)
}
