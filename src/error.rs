//! Error types for fairshare
//!
//! Data-validity problems inside a single simulation never surface here: the
//! ingestor discards that simulation and counts it. Everything in this enum
//! either aborts a dataset build or reports a misuse of the API.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// fairshare error types
#[derive(Error, Debug)]
pub enum Error {
    /// Per-simulation example sets disagree on shape, names, or scaling groups
    #[error("Schema mismatch across simulations: {0}\nAll simulations must be produced with the same feature spec")]
    SchemaMismatch(String),

    /// Features that consist only of the "unknown" sentinel cannot be imputed
    #[error("Features contain only the unknown sentinel and cannot be imputed: {}", .0.join(", "))]
    UnusableFeatures(Vec<String>),

    /// A derived class label fell outside `[0, num_classes)` (labeling bug)
    #[error("Invalid class {class} in simulation {simulation} (expected 0..{num_classes})")]
    LabelOutOfRange {
        /// Simulation that produced the label
        simulation: String,
        /// Offending label
        class: i64,
        /// Number of classes declared by the model
        num_classes: usize,
    },

    /// Every simulation was discarded during ingestion
    #[error("No valid simulations found ({discarded} discarded)")]
    NoUsableSimulations {
        /// Number of simulations that were discarded
        discarded: usize,
    },

    /// Invalid argument or configuration value
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Model capability failure (unsupported operation, bad snapshot)
    #[error("Model error: {0}")]
    Model(String),

    /// Storage error (Parquet/Arrow artifact layout)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Worker pool could not be created
    #[error("Worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    /// Layered configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
