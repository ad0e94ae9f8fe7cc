//! Attempt Record - one training attempt of a configuration

use crate::train::StopReason;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Status of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptStatus {
    /// Created but not yet started.
    Pending,
    /// Currently training.
    Running,
    /// Produced a usable model.
    Completed,
    /// Failed in a retryable way (0% accuracy or an unrecovered divergence).
    Degenerate,
    /// Aborted with an error.
    Failed,
}

/// A single training attempt.
///
/// Lifecycle: `Pending → Running → {Completed | Degenerate | Failed}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    attempt_id: String,
    sweep_id: String,
    index: usize,
    status: AttemptStatus,
    accuracy: Option<f64>,
    duration_s: Option<f64>,
    stop_reason: Option<StopReason>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    /// Create attempt number `index` of a sweep, in Pending status.
    #[must_use]
    pub fn new(sweep_id: impl Into<String>, index: usize) -> Self {
        let sweep_id = sweep_id.into();
        Self {
            attempt_id: format!("{sweep_id}#{index}"),
            sweep_id,
            index,
            status: AttemptStatus::Pending,
            accuracy: None,
            duration_s: None,
            stop_reason: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Get the attempt ID.
    #[must_use]
    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Get the parent sweep ID.
    #[must_use]
    pub fn sweep_id(&self) -> &str {
        &self.sweep_id
    }

    /// Get the zero-based attempt number.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Get the current status.
    #[must_use]
    pub const fn status(&self) -> AttemptStatus {
        self.status
    }

    /// Get the test accuracy, once known.
    #[must_use]
    pub const fn accuracy(&self) -> Option<f64> {
        self.accuracy
    }

    /// Get the training time in seconds, once known.
    #[must_use]
    pub const fn duration_s(&self) -> Option<f64> {
        self.duration_s
    }

    /// Get why training stopped, once known.
    #[must_use]
    pub const fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Transition to Running.
    pub fn start(&mut self) {
        self.status = AttemptStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record why training stopped.
    pub fn set_stop_reason(&mut self, stop_reason: StopReason) {
        self.stop_reason = Some(stop_reason);
    }

    /// Finish with a usable model.
    pub fn complete(&mut self, accuracy: f64, duration: Duration) {
        self.accuracy = Some(accuracy);
        self.duration_s = Some(duration.as_secs_f64());
        self.finish(AttemptStatus::Completed);
    }

    /// Finish as degenerate.
    pub fn mark_degenerate(&mut self, accuracy: f64) {
        self.accuracy = Some(accuracy);
        self.finish(AttemptStatus::Degenerate);
    }

    /// Finish with an error.
    pub fn fail(&mut self) {
        self.finish(AttemptStatus::Failed);
    }

    fn finish(&mut self, status: AttemptStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}
