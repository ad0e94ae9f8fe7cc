//! Sweep Record - one evaluated configuration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The configuration whose attempts a store tracks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepRecord {
    sweep_id: String,
    config: Value,
    created_at: DateTime<Utc>,
}

impl SweepRecord {
    /// Create a record for the configuration `config` named `sweep_id`.
    #[must_use]
    pub fn new(sweep_id: impl Into<String>, config: Value) -> Self {
        Self {
            sweep_id: sweep_id.into(),
            config,
            created_at: Utc::now(),
        }
    }

    /// Get the sweep ID (the configuration identifier).
    #[must_use]
    pub fn sweep_id(&self) -> &str {
        &self.sweep_id
    }

    /// Get the configuration as JSON.
    #[must_use]
    pub const fn config(&self) -> &Value {
        &self.config
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
