//! # fairshare: fairness-classification training pipeline
//!
//! Turns per-packet telemetry from network simulations into a single
//! normalized, labeled dataset and trains classifiers that predict whether a
//! flow receives its fair share of a bottleneck link.
//!
//! ## Pipeline
//!
//! - **Ingestion**: each simulation is loaded, trimmed of its warmup,
//!   labeled and subsampled on a bounded worker pool; workers hand back
//!   scratch-file handles, not data
//! - **Assembly**: examples are merged, unknown values repaired and inputs
//!   scaled per feature group
//! - **Training**: class-balanced batches with early stopping, a best-model
//!   checkpoint with rollback, and a wall-clock timeout
//! - **Trials**: degenerate attempts are retried and the best of several
//!   trials scores the configuration
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use fairshare::config::RunConfig;
//! use fairshare::runner::run_config;
//! use fairshare::simulation::ParquetSimulationLoader;
//!
//! fairshare::logging::init();
//! let cfg = RunConfig::load("run.toml")?;
//! let (error, seconds) = run_config(&cfg, &ParquetSimulationLoader)?.as_pair();
//! println!("error {error:.4} after {seconds:.1}s");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod matrix;
pub mod model;
pub mod pool;
pub mod runner;
pub mod scaling;
pub mod simulation;
pub mod storage;
pub mod tracking;
pub mod train;
pub mod trial;

pub use error::{Error, Result};
