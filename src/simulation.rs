//! Simulation records and loaders
//!
//! The raw on-disk format of a simulation is owned by whoever produced it.
//! The pipeline only needs a [`SimulationLoader`] that turns a path into a
//! [`Simulation`] (metadata) plus a [`FeatureMatrix`] of per-packet
//! measurements. [`ParquetSimulationLoader`] covers the common case of one
//! Parquet file per simulation with the metadata encoded in the file name.

use crate::matrix::FeatureMatrix;
use crate::{storage, Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

/// Metadata describing one simulation run.
///
/// Immutable once parsed. Flow counts drive the fair-share labeling; the
/// link parameters are carried for grouping and reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Simulation {
    name: String,
    unfair_flows: u32,
    fair_flows: u32,
    bandwidth_mbps: Option<f64>,
    btl_delay_us: Option<u64>,
    queue_packets: Option<u64>,
}

impl Simulation {
    /// Create a record from its name and flow counts.
    #[must_use]
    pub fn new(name: impl Into<String>, unfair_flows: u32, fair_flows: u32) -> Self {
        Self {
            name: name.into(),
            unfair_flows,
            fair_flows,
            bandwidth_mbps: None,
            btl_delay_us: None,
            queue_packets: None,
        }
    }

    /// Parse a record from a simulation name such as
    /// `10Mbps-40us-100p-1unfair-4other-1380B-80s`.
    ///
    /// Tokens are `-`-separated and identified by their unit suffix; tokens
    /// that are not recognized are ignored. Any leading directories and the
    /// file extension are stripped first.
    ///
    /// # Errors
    ///
    /// Returns error if either flow count is missing or the total is zero.
    pub fn from_name(name: &str) -> Result<Self> {
        let stem = Path::new(name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(name);
        let mut unfair: Option<u32> = None;
        let mut fair: Option<u32> = None;
        let mut sim = Self::new(stem, 0, 0);

        for token in stem.split('-') {
            if let Some(v) = token.strip_suffix("unfair") {
                unfair = v.parse().ok().or(unfair);
            } else if let Some(v) = token.strip_suffix("other") {
                fair = v.parse().ok().or(fair);
            } else if let Some(v) = token.strip_suffix("Mbps") {
                sim.bandwidth_mbps = v.parse().ok().or(sim.bandwidth_mbps);
            } else if let Some(v) = token.strip_suffix("us") {
                sim.btl_delay_us = v.parse().ok().or(sim.btl_delay_us);
            } else if let Some(v) = token.strip_suffix('p') {
                sim.queue_packets = v.parse().ok().or(sim.queue_packets);
            }
        }

        match (unfair, fair) {
            (Some(u), Some(f)) if u.checked_add(f).is_some_and(|total| total > 0) => {
                sim.unfair_flows = u;
                sim.fair_flows = f;
                Ok(sim)
            }
            _ => Err(Error::InvalidInput(format!(
                "Simulation name does not encode flow counts: {name}"
            ))),
        }
    }

    /// Set the bottleneck bandwidth.
    #[must_use]
    pub const fn with_bandwidth_mbps(mut self, bandwidth_mbps: f64) -> Self {
        self.bandwidth_mbps = Some(bandwidth_mbps);
        self
    }

    /// Set the bottleneck delay.
    #[must_use]
    pub const fn with_btl_delay_us(mut self, btl_delay_us: u64) -> Self {
        self.btl_delay_us = Some(btl_delay_us);
        self
    }

    /// Set the bottleneck queue size.
    #[must_use]
    pub const fn with_queue_packets(mut self, queue_packets: u64) -> Self {
        self.queue_packets = Some(queue_packets);
        self
    }

    /// Simulation name (file stem).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of flows under observation.
    #[must_use]
    pub const fn unfair_flows(&self) -> u32 {
        self.unfair_flows
    }

    /// Number of competing flows.
    #[must_use]
    pub const fn fair_flows(&self) -> u32 {
        self.fair_flows
    }

    /// Total flows sharing the bottleneck.
    #[must_use]
    pub const fn total_flows(&self) -> u32 {
        self.unfair_flows.saturating_add(self.fair_flows)
    }

    /// Bottleneck bandwidth, if known.
    #[must_use]
    pub const fn bandwidth_mbps(&self) -> Option<f64> {
        self.bandwidth_mbps
    }

    /// Bottleneck delay, if known.
    #[must_use]
    pub const fn btl_delay_us(&self) -> Option<u64> {
        self.btl_delay_us
    }

    /// Bottleneck queue size, if known.
    #[must_use]
    pub const fn queue_packets(&self) -> Option<u64> {
        self.queue_packets
    }
}

/// Loads one raw simulation.
///
/// Loader failures are not fatal to a batch: the ingestor logs them and
/// discards that simulation, so implementations may use any error type.
pub trait SimulationLoader: Send + Sync {
    /// Load the record and its per-packet measurements.
    ///
    /// # Errors
    ///
    /// Any failure to read or parse the simulation.
    fn load(&self, path: &Path) -> anyhow::Result<(Simulation, FeatureMatrix)>;
}

/// Loads simulations stored as one Parquet file each.
///
/// Every numeric column becomes a feature; other columns are skipped. The
/// metadata is parsed from the file name with [`Simulation::from_name`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ParquetSimulationLoader;

impl SimulationLoader for ParquetSimulationLoader {
    fn load(&self, path: &Path) -> anyhow::Result<(Simulation, FeatureMatrix)> {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid simulation path: {}", path.display()))?;
        let sim = Simulation::from_name(name)?;
        let table = storage::read_numeric_table(path)?;
        Ok((sim, table))
    }
}

/// Select the simulations to ingest.
///
/// Uses `explicit` when non-empty, otherwise every entry of `data_dir` in
/// sorted order. The list is then shuffled with `seed` so that parallel
/// instances see the same order, and truncated to `num_sims`.
///
/// # Errors
///
/// Returns error if the directory cannot be listed or holds fewer than
/// `num_sims` simulations.
pub fn discover_simulations(
    data_dir: &Path,
    explicit: &[PathBuf],
    num_sims: Option<usize>,
    seed: u64,
) -> Result<Vec<PathBuf>> {
    let mut sims: Vec<PathBuf> = if explicit.is_empty() {
        let mut found = Vec::new();
        for entry in std::fs::read_dir(data_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                found.push(entry.path());
            }
        }
        found.sort();
        found
    } else {
        explicit.to_vec()
    };

    sims.shuffle(&mut StdRng::seed_from_u64(seed));

    if let Some(num_sims) = num_sims {
        if sims.len() < num_sims {
            return Err(Error::InvalidInput(format!(
                "Insufficient simulations. Requested {num_sims}, but only {} available.",
                sims.len()
            )));
        }
        sims.truncate(num_sims);
    }
    info!("Found {} simulations.", sims.len());
    Ok(sims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name_parses_tokens() {
        let sim = Simulation::from_name("/data/10Mbps-40us-100p-1unfair-4other-1380B-80s.parquet")
            .unwrap();
        assert_eq!(sim.name(), "10Mbps-40us-100p-1unfair-4other-1380B-80s");
        assert_eq!(sim.unfair_flows(), 1);
        assert_eq!(sim.fair_flows(), 4);
        assert_eq!(sim.total_flows(), 5);
        assert_eq!(sim.bandwidth_mbps(), Some(10.0));
        assert_eq!(sim.btl_delay_us(), Some(40));
        assert_eq!(sim.queue_packets(), Some(100));
    }

    #[test]
    fn test_from_name_requires_flow_counts() {
        assert!(Simulation::from_name("10Mbps-40us-100p").is_err());
        assert!(Simulation::from_name("0unfair-0other").is_err());
    }

    #[test]
    fn test_overflowing_flow_counts_are_rejected() {
        let err = Simulation::from_name("4294967295unfair-1other").unwrap_err();
        assert!(err.to_string().contains("flow counts"));
        assert!(Simulation::from_name("4294967294unfair-1other").is_ok());
        assert_eq!(Simulation::new("x", u32::MAX, 3).total_flows(), u32::MAX);
    }

    #[test]
    fn test_discover_is_seeded_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..6 {
            std::fs::write(dir.path().join(format!("{i}unfair-1other")), b"").unwrap();
        }
        let a = discover_simulations(dir.path(), &[], Some(4), 1337).unwrap();
        let b = discover_simulations(dir.path(), &[], Some(4), 1337).unwrap();
        assert_eq!(a.len(), 4);
        assert_eq!(a, b);

        let err = discover_simulations(dir.path(), &[], Some(7), 1337).unwrap_err();
        assert!(err.to_string().contains("Insufficient simulations"));
    }
}
