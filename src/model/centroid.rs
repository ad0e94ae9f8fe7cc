//! Nearest class centroid, a classical estimator fitted in one pass.

use super::{Capabilities, FeatureSpec, Forward, HiddenState, Model, ModelState};
use crate::{Error, Result};

const NAME: &str = "centroid";

/// Predicts the class whose training mean is closest (squared Euclidean).
///
/// Classes absent from the training data score negative infinity.
#[derive(Debug, Clone)]
pub struct NearestCentroid {
    spec: FeatureSpec,
    input_dim: usize,
    centroids: Vec<Option<Vec<f64>>>,
    training: bool,
}

impl NearestCentroid {
    /// Create an unfitted estimator.
    #[must_use]
    pub fn new(spec: FeatureSpec, input_dim: usize) -> Self {
        let centroids = vec![None; spec.num_classes];
        Self {
            spec,
            input_dim,
            centroids,
            training: true,
        }
    }

    fn check_width(&self, inputs: &[Vec<f64>]) -> Result<()> {
        match inputs.iter().find(|row| row.len() != self.input_dim) {
            Some(row) => Err(Error::Model(format!(
                "Expected {} input features, got {}",
                self.input_dim,
                row.len()
            ))),
            None => Ok(()),
        }
    }
}

impl Model for NearestCentroid {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            requires_hidden_state: false,
            trains_via_batches: false,
        }
    }

    fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    fn forward(&self, inputs: &[Vec<f64>], hidden: HiddenState) -> Result<Forward> {
        self.check_width(inputs)?;
        let logits = inputs
            .iter()
            .map(|row| {
                self.centroids
                    .iter()
                    .map(|c| {
                        c.as_ref().map_or(f64::NEG_INFINITY, |c| {
                            -c.iter().zip(row).map(|(a, b)| (a - b) * (a - b)).sum::<f64>()
                        })
                    })
                    .collect()
            })
            .collect();
        Ok(Forward { logits, hidden })
    }

    fn step(&mut self, _inputs: &[Vec<f64>], _labels: &[u32], _forward: &Forward) -> Result<()> {
        Err(Error::Model(format!("{NAME} is not trained via batches")))
    }

    #[allow(clippy::cast_precision_loss)]
    fn fit(&mut self, inputs: &[Vec<f64>], labels: &[u32]) -> Result<()> {
        self.check_width(inputs)?;
        let classes = self.spec.num_classes;
        let mut sums = vec![vec![0.0; self.input_dim]; classes];
        let mut counts = vec![0usize; classes];
        for (row, &label) in inputs.iter().zip(labels) {
            let label = label as usize;
            if label >= classes {
                return Err(Error::Model(format!("Label {label} out of range")));
            }
            counts[label] += 1;
            for (s, x) in sums[label].iter_mut().zip(row) {
                *s += x;
            }
        }
        self.centroids = sums
            .into_iter()
            .zip(counts)
            .map(|(sum, count)| {
                (count > 0).then(|| sum.into_iter().map(|s| s / count as f64).collect())
            })
            .collect();
        Ok(())
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    // One presence flag per class, followed by its coordinates.
    fn snapshot(&self) -> ModelState {
        let mut params = Vec::with_capacity(self.centroids.len() * (self.input_dim + 1));
        for centroid in &self.centroids {
            match centroid {
                Some(c) => {
                    params.push(1.0);
                    params.extend_from_slice(c);
                }
                None => {
                    params.push(0.0);
                    params.extend(std::iter::repeat(0.0).take(self.input_dim));
                }
            }
        }
        ModelState {
            model: NAME.to_string(),
            params,
        }
    }

    fn restore(&mut self, state: &ModelState) -> Result<()> {
        let stride = self.input_dim + 1;
        if state.model != NAME || state.params.len() != self.spec.num_classes * stride {
            return Err(Error::Model(format!(
                "Cannot restore {} with {} parameters into {NAME}",
                state.model,
                state.params.len()
            )));
        }
        self.centroids = state
            .params
            .chunks_exact(stride)
            .map(|chunk| (chunk[0] > 0.5).then(|| chunk[1..].to_vec()))
            .collect();
        Ok(())
    }
}
