//! Trial orchestration
//!
//! A configuration is scored by running several independent training
//! trials and keeping the best one. Some trials fail in a way that says
//! nothing about the configuration (the model collapsed to 0% accuracy or
//! diverged with no earlier checkpoint to fall back on); those are retried
//! without using up a trial, but every attempt counts against a hard cap.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// Result of one training attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrialOutcome {
    /// The attempt produced a usable model.
    Completed {
        /// Test accuracy in `[0, 1]`.
        accuracy: f64,
        /// Training wall-clock time.
        duration: Duration,
    },
    /// The attempt failed in a way worth retrying.
    Degenerate,
}

impl TrialOutcome {
    /// Classify a finished attempt: 0% accuracy, or a tested model that is
    /// itself the diverged state, is degenerate.
    #[must_use]
    pub fn from_result(accuracy: f64, duration: Duration, diverged_model: bool) -> Self {
        if diverged_model || accuracy <= 0.0 || !accuracy.is_finite() {
            Self::Degenerate
        } else {
            Self::Completed { accuracy, duration }
        }
    }
}

/// How many trials to collect and how many attempts to allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialPolicy {
    /// Successful trials wanted.
    pub conf_trials: usize,
    /// Attempts allowed in total (successful or not).
    pub max_attempts: usize,
}

impl Default for TrialPolicy {
    fn default() -> Self {
        Self {
            conf_trials: 1,
            max_attempts: 10,
        }
    }
}

/// Aggregate over all attempts of one configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum TrialSummary {
    /// At least one attempt succeeded.
    Best {
        /// `1 - accuracy` of the best trial.
        error: f64,
        /// Duration of the best trial.
        duration: Duration,
        /// Accuracy of every successful trial, in order.
        accuracies: Vec<f64>,
        /// Attempts made.
        attempts: usize,
    },
    /// Every attempt was degenerate.
    NotTrainable {
        /// Attempts made.
        attempts: usize,
    },
}

impl TrialSummary {
    /// `(error, seconds)`; `(NaN, NaN)` when not trainable.
    #[must_use]
    pub fn as_pair(&self) -> (f64, f64) {
        match self {
            Self::Best {
                error, duration, ..
            } => (*error, duration.as_secs_f64()),
            Self::NotTrainable { .. } => (f64::NAN, f64::NAN),
        }
    }

    /// Attempts made.
    #[must_use]
    pub const fn attempts(&self) -> usize {
        match self {
            Self::Best { attempts, .. } | Self::NotTrainable { attempts } => *attempts,
        }
    }
}

/// Run attempts until `conf_trials` succeed or `max_attempts` are used.
///
/// `attempt` receives the zero-based attempt number.
///
/// # Errors
///
/// Propagates errors returned by `attempt`; degenerate trials are not
/// errors.
pub fn run_trials<F>(policy: TrialPolicy, mut attempt: F) -> Result<TrialSummary>
where
    F: FnMut(usize) -> Result<TrialOutcome>,
{
    let mut successes: Vec<(f64, Duration)> = Vec::new();
    let mut attempts = 0;

    while successes.len() < policy.conf_trials && attempts < policy.max_attempts {
        let outcome = attempt(attempts)?;
        attempts += 1;
        match outcome {
            TrialOutcome::Completed { accuracy, duration } => {
                info!(
                    "Trial {} of {}: accuracy {:.2}%",
                    successes.len() + 1,
                    policy.conf_trials,
                    accuracy * 100.0
                );
                successes.push((accuracy, duration));
            }
            TrialOutcome::Degenerate => {
                warn!(
                    "Attempt {attempts} of {} was degenerate, retrying",
                    policy.max_attempts
                );
            }
        }
    }

    let best = successes
        .iter()
        .copied()
        .reduce(|best, cur| if cur.0 > best.0 { cur } else { best });
    Ok(match best {
        Some((accuracy, duration)) => {
            info!("Best accuracy: {:.2}%", accuracy * 100.0);
            TrialSummary::Best {
                error: 1.0 - accuracy,
                duration,
                accuracies: successes.iter().map(|s| s.0).collect(),
                attempts,
            }
        }
        None => {
            warn!("No trainable model after {attempts} attempts");
            TrialSummary::NotTrainable { attempts }
        }
    })
}
