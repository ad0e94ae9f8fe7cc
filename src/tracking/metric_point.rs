//! Metric Point - time-series value logged during an attempt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One value of a named metric at a training step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricPoint {
    attempt_id: String,
    key: String,
    step: u64,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl MetricPoint {
    /// Create a point stamped with the current time.
    #[must_use]
    pub fn new(attempt_id: impl Into<String>, key: impl Into<String>, step: u64, value: f64) -> Self {
        Self {
            attempt_id: attempt_id.into(),
            key: key.into(),
            step,
            value,
            timestamp: Utc::now(),
        }
    }

    /// Override the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Get the attempt ID.
    #[must_use]
    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Get the metric name.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the step.
    #[must_use]
    pub const fn step(&self) -> u64 {
        self.step
    }

    /// Get the value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Get the timestamp.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_metric_point_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let point = MetricPoint::new("cfg#0", "val_loss", 7, 0.25).with_timestamp(ts);
        assert_eq!(point.attempt_id(), "cfg#0");
        assert_eq!(point.key(), "val_loss");
        assert_eq!(point.step(), 7);
        assert!((point.value() - 0.25).abs() < f64::EPSILON);
        assert_eq!(point.timestamp(), ts);
    }
}
