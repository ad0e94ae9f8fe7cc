//! Fair-share labeling
//!
//! The continuous target is the share of the bottleneck a flow received.
//! Relative to the ideal share `1 / total_flows` it falls into one of five
//! classes, from "much more than fair" (0) to "much less than fair" (4).

use super::LabeledOutputs;
use crate::matrix::FeatureMatrix;
use crate::scaling::GroupKey;
use crate::simulation::Simulation;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Number of fairness classes.
pub const NUM_CLASSES: usize = 5;

/// Relative deviation from the fair share still considered fair.
pub const FAIR_THRESHOLD: f64 = 0.1;

/// Relative deviation beyond which a flow is considered very unfair.
pub const UNFAIR_THRESHOLD: f64 = 0.4;

/// Feature holding the analytical (Mathis model) label.
pub const ORACLE_FEATURE: &str = "mathis model label-ewma-alpha0.01";

// Suffixes that mark a windowed variant of a base metric. Variants of the
// same metric share a scaling group.
const WINDOW_MARKERS: [&str; 2] = ["-ewma-", "-windowed-"];

/// Input and output features a model expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSpec {
    /// Input feature names, in model input order.
    pub in_spec: Vec<String>,
    /// Output feature names the labels are derived from.
    pub out_spec: Vec<String>,
    /// Feature read directly as the oracle label.
    pub oracle_feature: String,
    /// Number of output classes.
    pub num_classes: usize,
}

impl FeatureSpec {
    /// Default spec for fair-share classification.
    #[must_use]
    pub fn fairness() -> Self {
        let metrics = ["throughput p/s", "RTT ratio us", "loss rate"];
        let windows = ["ewma-alpha0.01", "windowed-minRtt16"];
        let in_spec = metrics
            .iter()
            .flat_map(|m| windows.iter().map(move |w| format!("{m}-{w}")))
            .collect();
        Self {
            in_spec,
            out_spec: vec!["queue occupancy-ewma-alpha0.5".to_string()],
            oracle_feature: ORACLE_FEATURE.to_string(),
            num_classes: NUM_CLASSES,
        }
    }

    /// Replace the input features.
    #[must_use]
    pub fn with_inputs(mut self, in_spec: Vec<String>) -> Self {
        self.in_spec = in_spec;
        self
    }

    /// Scaling group of every input feature.
    ///
    /// Features are grouped by their base metric: the name up to the first
    /// window marker (`-ewma-`, `-windowed-`), or the whole name.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn scaling_groups(&self) -> Vec<GroupKey> {
        let mut bases: Vec<&str> = Vec::new();
        self.in_spec
            .iter()
            .map(|name| {
                let base = base_metric(name);
                let idx = bases.iter().position(|b| *b == base).unwrap_or_else(|| {
                    bases.push(base);
                    bases.len() - 1
                });
                idx as GroupKey
            })
            .collect()
    }
}

fn base_metric(name: &str) -> &str {
    WINDOW_MARKERS
        .iter()
        .filter_map(|marker| name.find(marker))
        .min()
        .map_or(name, |end| &name[..end])
}

/// Fairness class of a bottleneck share given the number of flows.
///
/// With `fair = 1 / total_flows` and `dif = (fair - share) / fair`:
/// `dif < -0.4` ⇒ 0, `dif < -0.1` ⇒ 1, `|dif| <= 0.1` ⇒ 2,
/// `dif <= 0.4` ⇒ 3, otherwise 4.
///
/// # Examples
///
/// ```rust
/// use fairshare::model::fairness::fairness_class;
///
/// assert_eq!(fairness_class(0.25, 4), 2);
/// assert_eq!(fairness_class(0.9, 4), 0);
/// assert_eq!(fairness_class(0.01, 4), 4);
/// ```
#[must_use]
pub fn fairness_class(share: f64, total_flows: u32) -> i64 {
    let fair = 1.0 / f64::from(total_flows);
    let dif = (fair - share) / fair;
    if dif < -UNFAIR_THRESHOLD {
        0
    } else if dif < -FAIR_THRESHOLD {
        1
    } else if dif <= FAIR_THRESHOLD {
        2
    } else if dif <= UNFAIR_THRESHOLD {
        3
    } else {
        4
    }
}

/// Label a simulation's single output feature with [`fairness_class`].
///
/// # Errors
///
/// Returns error unless the outputs have exactly one column.
pub fn label_outputs(sim: &Simulation, outputs: &FeatureMatrix) -> Result<LabeledOutputs> {
    if outputs.num_columns() != 1 {
        return Err(Error::Model(format!(
            "Fairness labeling needs exactly one output feature, got {}",
            outputs.num_columns()
        )));
    }
    let raw_labels = outputs.column(0).to_vec();
    let labels = raw_labels
        .iter()
        .map(|&share| fairness_class(share, sim.total_flows()))
        .collect();
    Ok(LabeledOutputs { labels, raw_labels })
}
