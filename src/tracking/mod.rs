//! Trial tracking records
//!
//! Every configuration run leaves a JSON trail next to its model file:
//!
//! ```text
//! SweepRecord (1) ──< AttemptRecord (N)
//!                          │
//!                          ├──< MetricPoint (N) [time-series]
//!                          └──< CheckpointRecord (N) [sha256]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use fairshare::tracking::{AttemptRecord, AttemptStatus, MetricPoint, SweepRecord, TrackingStore};
//! use std::time::Duration;
//!
//! let mut store = TrackingStore::new(SweepRecord::new("cfg-1", serde_json::json!({"epochs": 3})));
//!
//! let mut attempt = AttemptRecord::new("cfg-1", 0);
//! attempt.start();
//! store.add_metric(MetricPoint::new(attempt.attempt_id(), "train_loss", 0, 0.7));
//! attempt.complete(0.8, Duration::from_secs(2));
//! store.add_attempt(attempt);
//!
//! assert_eq!(store.best_attempt().map(|a| a.status()), Some(AttemptStatus::Completed));
//! ```

mod attempt_record;
mod checkpoint_record;
mod metric_point;
mod store;
mod sweep_record;

pub use attempt_record::{AttemptRecord, AttemptStatus};
pub use checkpoint_record::CheckpointRecord;
pub use metric_point::MetricPoint;
pub use store::TrackingStore;
pub use sweep_record::SweepRecord;
