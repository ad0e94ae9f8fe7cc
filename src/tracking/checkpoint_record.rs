//! Checkpoint Record - content hash of a persisted model

use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// A model file written by an attempt.
///
/// The hash has the form `sha256:<hex digest>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointRecord {
    attempt_id: String,
    path: PathBuf,
    cas_hash: String,
    size_bytes: u64,
    created_at: DateTime<Utc>,
}

impl CheckpointRecord {
    /// Hash the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read.
    pub fn from_file(attempt_id: impl Into<String>, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self {
            attempt_id: attempt_id.into(),
            path: path.to_path_buf(),
            cas_hash: format!("sha256:{}", hex::encode(Sha256::digest(&bytes))),
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        })
    }

    /// Get the attempt ID.
    #[must_use]
    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    /// Get the model file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the content hash.
    #[must_use]
    pub fn cas_hash(&self) -> &str {
        &self.cas_hash
    }

    /// Get the file size in bytes.
    #[must_use]
    pub const fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
