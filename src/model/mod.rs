//! Model capability interface
//!
//! The training core never inspects concrete model types. Everything it
//! needs is behind [`Model`], and the two places where model kinds differ
//! are declared up front in [`Capabilities`]:
//!
//! - `requires_hidden_state`: the controller creates a fresh
//!   [`HiddenState`] for every sequence (batch) and threads it through
//!   [`Model::forward`]. The state is owned by the caller, never by the model.
//! - `trains_via_batches`: gradient-trained models go through the epoch and
//!   batch loop; classical estimators are fitted once with [`Model::fit`].
//!
//! Two reference models ship with the crate so the pipeline runs end to
//! end: [`SoftmaxRegression`] (SGD with momentum) and [`NearestCentroid`].

mod centroid;
pub mod fairness;
mod softmax;

pub use centroid::NearestCentroid;
pub use fairness::FeatureSpec;
pub use softmax::SoftmaxRegression;

use crate::matrix::FeatureMatrix;
use crate::simulation::Simulation;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;

/// Capability flags the controller and orchestrator branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// A fresh hidden state must be created for every sequence.
    pub requires_hidden_state: bool,
    /// Trained through the batch loop (as opposed to a single `fit`).
    pub trains_via_batches: bool,
}

/// Per-sequence recurrent state.
///
/// Empty for feed-forward models.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HiddenState {
    /// Hidden activations.
    pub hidden: Vec<f64>,
    /// Cell activations.
    pub cell: Vec<f64>,
}

impl HiddenState {
    /// A zeroed state of the given width.
    #[must_use]
    pub fn zeros(width: usize) -> Self {
        Self {
            hidden: vec![0.0; width],
            cell: vec![0.0; width],
        }
    }

    /// True if this state carries nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hidden.is_empty() && self.cell.is_empty()
    }
}

/// Output of one forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Forward {
    /// One row of class scores per example.
    pub logits: Vec<Vec<f64>>,
    /// Hidden state after the pass.
    pub hidden: HiddenState,
}

impl Forward {
    /// Highest-scoring class per example.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn predictions(&self) -> Vec<u32> {
        self.logits
            .iter()
            .map(|row| {
                row.iter()
                    .enumerate()
                    .fold((0usize, f64::NEG_INFINITY), |best, (idx, &v)| {
                        if v > best.1 {
                            (idx, v)
                        } else {
                            best
                        }
                    })
                    .0 as u32
            })
            .collect()
    }

    /// Number of predictions that match `labels`.
    #[must_use]
    pub fn num_correct(&self, labels: &[u32]) -> usize {
        self.predictions()
            .iter()
            .zip(labels)
            .filter(|(p, l)| p == l)
            .count()
    }
}

/// Labels derived from a simulation's output features.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledOutputs {
    /// Class index per row. Signed so that out-of-range values stay visible.
    pub labels: Vec<i64>,
    /// Continuous value each class was derived from.
    pub raw_labels: Vec<f64>,
}

/// Serializable snapshot of a trained model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    /// Model name the parameters belong to.
    pub model: String,
    /// Flattened parameters.
    pub params: Vec<f64>,
}

impl ModelState {
    /// Write the snapshot as JSON.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Read a snapshot written by [`ModelState::save`].
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        Ok(serde_json::from_reader(reader)?)
    }
}

/// The contract the training core requires from a model.
///
/// `Sync` so that ingestion workers can share one instance for
/// [`Model::transform`].
pub trait Model: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Declared capabilities.
    fn capabilities(&self) -> Capabilities;

    /// Expected input/output features.
    fn spec(&self) -> &FeatureSpec;

    /// Convert output features into class labels plus their raw values.
    ///
    /// # Errors
    ///
    /// Returns error if the outputs do not have the shape the model expects.
    fn transform(&self, sim: &Simulation, outputs: &FeatureMatrix) -> Result<LabeledOutputs> {
        fairness::label_outputs(sim, outputs)
    }

    /// Fresh per-sequence state for a batch of `batch_size` examples.
    fn init_hidden(&self, _batch_size: usize) -> HiddenState {
        HiddenState::default()
    }

    /// Score a batch of row-major inputs.
    ///
    /// # Errors
    ///
    /// Returns error if the inputs have the wrong width.
    fn forward(&self, inputs: &[Vec<f64>], hidden: HiddenState) -> Result<Forward>;

    /// Loss of a forward pass against the true labels.
    fn loss(&self, forward: &Forward, labels: &[u32]) -> f64 {
        cross_entropy(&forward.logits, labels)
    }

    /// Back-propagate the loss of `forward` and update the parameters.
    ///
    /// # Errors
    ///
    /// Returns error if the model is not trained via batches.
    fn step(&mut self, inputs: &[Vec<f64>], labels: &[u32], forward: &Forward) -> Result<()>;

    /// Fit directly on raw arrays (classical estimators).
    ///
    /// # Errors
    ///
    /// Returns error by default: gradient-trained models do not support it.
    fn fit(&mut self, _inputs: &[Vec<f64>], _labels: &[u32]) -> Result<()> {
        Err(Error::Model(format!("{} does not support fit", self.name())))
    }

    /// Switch between training and inference mode.
    fn set_training(&mut self, training: bool);

    /// Current mode.
    fn is_training(&self) -> bool;

    /// Copy of the current parameters.
    fn snapshot(&self) -> ModelState;

    /// Replace the current parameters.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot belongs to another model or shape.
    fn restore(&mut self, state: &ModelState) -> Result<()>;
}

/// Mean softmax cross-entropy of `logits` against `labels`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn cross_entropy(logits: &[Vec<f64>], labels: &[u32]) -> f64 {
    if logits.is_empty() {
        return 0.0;
    }
    let total: f64 = logits
        .iter()
        .zip(labels)
        .map(|(row, &label)| {
            let max = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let log_sum = row.iter().map(|v| (v - max).exp()).sum::<f64>().ln() + max;
            log_sum - row[label as usize]
        })
        .sum();
    total / logits.len() as f64
}

/// Optimizer settings for gradient-trained models.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelParams {
    /// SGD learning rate.
    pub learning_rate: f64,
    /// SGD momentum.
    pub momentum: f64,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.001,
            momentum: 0.9,
        }
    }
}

/// Registry of the models this crate can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    /// Multinomial logistic regression trained with SGD + momentum.
    SoftmaxRegression,
    /// Nearest class centroid, fitted in one pass.
    NearestCentroid,
}

impl ModelKind {
    /// Every registered kind.
    pub const ALL: [Self; 2] = [Self::SoftmaxRegression, Self::NearestCentroid];

    /// Registry name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SoftmaxRegression => "softmax",
            Self::NearestCentroid => "centroid",
        }
    }

    /// Capabilities of models of this kind.
    #[must_use]
    pub const fn capabilities(self) -> Capabilities {
        match self {
            Self::SoftmaxRegression => Capabilities {
                requires_hidden_state: false,
                trains_via_batches: true,
            },
            Self::NearestCentroid => Capabilities {
                requires_hidden_state: false,
                trains_via_batches: false,
            },
        }
    }

    /// Default feature spec of models of this kind.
    #[must_use]
    pub fn feature_spec(self) -> FeatureSpec {
        FeatureSpec::fairness()
    }

    /// Build an untrained model for inputs of width `input_dim`.
    #[must_use]
    pub fn build(
        self,
        spec: FeatureSpec,
        input_dim: usize,
        params: ModelParams,
        seed: u64,
    ) -> Box<dyn Model> {
        match self {
            Self::SoftmaxRegression => {
                Box::new(SoftmaxRegression::new(spec, input_dim, params, seed))
            }
            Self::NearestCentroid => Box::new(NearestCentroid::new(spec, input_dim)),
        }
    }
}

impl FromStr for ModelKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.name()).collect();
                Error::InvalidInput(format!(
                    "Unknown model \"{name}\" (known: {})",
                    known.join(", ")
                ))
            })
    }
}
