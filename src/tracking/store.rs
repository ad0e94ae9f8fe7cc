//! Tracking Store - the attempts, metrics and checkpoints of one sweep
//!
//! Persisted as a single JSON document (`<config id>.trials.json`).

use super::{AttemptRecord, AttemptStatus, CheckpointRecord, MetricPoint, SweepRecord};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// In-memory store for one sweep's tracking data.
///
/// The `metrics_for_attempt` query returns metrics ordered by step for
/// loss-curve analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackingStore {
    sweep: SweepRecord,
    attempts: Vec<AttemptRecord>,
    metrics: Vec<MetricPoint>,
    checkpoints: Vec<CheckpointRecord>,
}

impl TrackingStore {
    /// Create an empty store for `sweep`.
    #[must_use]
    pub const fn new(sweep: SweepRecord) -> Self {
        Self {
            sweep,
            attempts: Vec::new(),
            metrics: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    /// Get the sweep record.
    #[must_use]
    pub const fn sweep(&self) -> &SweepRecord {
        &self.sweep
    }

    /// Get all attempts, in insertion order.
    #[must_use]
    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    /// Get the checkpoints, in insertion order.
    #[must_use]
    pub fn checkpoints(&self) -> &[CheckpointRecord] {
        &self.checkpoints
    }

    /// Get the number of metric points.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.metrics.len()
    }

    /// Add an attempt.
    pub fn add_attempt(&mut self, attempt: AttemptRecord) {
        self.attempts.push(attempt);
    }

    /// Get an attempt by ID.
    #[must_use]
    pub fn attempt(&self, attempt_id: &str) -> Option<&AttemptRecord> {
        self.attempts.iter().find(|a| a.attempt_id() == attempt_id)
    }

    /// Add a metric point.
    pub fn add_metric(&mut self, metric: MetricPoint) {
        self.metrics.push(metric);
    }

    /// Add a checkpoint record.
    pub fn add_checkpoint(&mut self, checkpoint: CheckpointRecord) {
        self.checkpoints.push(checkpoint);
    }

    /// Metrics of one attempt and key, ordered by step.
    #[must_use]
    pub fn metrics_for_attempt(&self, attempt_id: &str, key: &str) -> Vec<MetricPoint> {
        let mut metrics: Vec<MetricPoint> = self
            .metrics
            .iter()
            .filter(|m| m.attempt_id() == attempt_id && m.key() == key)
            .cloned()
            .collect();
        metrics.sort_by_key(MetricPoint::step);
        metrics
    }

    /// The completed attempt with the highest accuracy.
    #[must_use]
    pub fn best_attempt(&self) -> Option<&AttemptRecord> {
        self.attempts
            .iter()
            .filter(|a| a.status() == AttemptStatus::Completed)
            .filter_map(|a| a.accuracy().map(|acc| (a, acc)))
            .reduce(|best, cur| if cur.1 > best.1 { cur } else { best })
            .map(|(a, _)| a)
    }

    /// Write the store as JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Read a store written by [`TrackingStore::save`].
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn store() -> TrackingStore {
        TrackingStore::new(SweepRecord::new("cfg", serde_json::json!({})))
    }

    #[test]
    fn test_metrics_ordered_by_step() {
        let mut store = store();
        store.add_metric(MetricPoint::new("cfg#0", "loss", 2, 0.2));
        store.add_metric(MetricPoint::new("cfg#0", "loss", 0, 0.0));
        store.add_metric(MetricPoint::new("cfg#1", "loss", 1, 9.0));
        store.add_metric(MetricPoint::new("cfg#0", "loss", 1, 0.1));

        let metrics = store.metrics_for_attempt("cfg#0", "loss");
        let steps: Vec<u64> = metrics.iter().map(MetricPoint::step).collect();
        assert_eq!(steps, vec![0, 1, 2]);
        assert_eq!(store.metric_count(), 4);
    }

    #[test]
    fn test_best_attempt_skips_degenerate() {
        let mut store = store();
        let mut a = AttemptRecord::new("cfg", 0);
        a.complete(0.6, Duration::from_secs(1));
        let mut b = AttemptRecord::new("cfg", 1);
        b.mark_degenerate(0.0);
        let mut c = AttemptRecord::new("cfg", 2);
        c.complete(0.9, Duration::from_secs(1));
        store.add_attempt(a);
        store.add_attempt(b);
        store.add_attempt(c);

        assert_eq!(store.best_attempt().map(AttemptRecord::index), Some(2));
        assert!(store.attempt("cfg#1").is_some());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.trials.json");
        let mut store = store();
        store.add_attempt(AttemptRecord::new("cfg", 0));
        store.add_metric(MetricPoint::new("cfg#0", "val_loss", 0, 0.5));
        store.save(&path).unwrap();

        assert_eq!(TrackingStore::load(&path).unwrap(), store);
    }
}
