//! Multinomial logistic regression trained with SGD + momentum.

use super::{Capabilities, FeatureSpec, Forward, HiddenState, Model, ModelParams, ModelState};
use crate::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const NAME: &str = "softmax";
const INIT_SCALE: f64 = 0.01;

/// Linear classifier with a softmax output layer.
///
/// Parameters are stored row-major per class: `input_dim` weights followed
/// by one bias.
#[derive(Debug, Clone)]
pub struct SoftmaxRegression {
    spec: FeatureSpec,
    input_dim: usize,
    weights: Vec<f64>,
    velocity: Vec<f64>,
    params: ModelParams,
    training: bool,
}

impl SoftmaxRegression {
    /// Create a model with small random weights drawn from `seed`.
    #[must_use]
    pub fn new(spec: FeatureSpec, input_dim: usize, params: ModelParams, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let len = spec.num_classes * (input_dim + 1);
        let weights = (0..len)
            .map(|_| rng.gen_range(-INIT_SCALE..INIT_SCALE))
            .collect();
        Self {
            spec,
            input_dim,
            weights,
            velocity: vec![0.0; len],
            params,
            training: true,
        }
    }

    fn stride(&self) -> usize {
        self.input_dim + 1
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

impl Model for SoftmaxRegression {
    fn name(&self) -> &str {
        NAME
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            requires_hidden_state: false,
            trains_via_batches: true,
        }
    }

    fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    fn forward(&self, inputs: &[Vec<f64>], hidden: HiddenState) -> Result<Forward> {
        self.check_width(inputs)?;
        let stride = self.stride();
        let logits = inputs
            .iter()
            .map(|row| {
                self.weights
                    .chunks_exact(stride)
                    .map(|w| {
                        let dot: f64 = w[..self.input_dim].iter().zip(row).map(|(a, b)| a * b).sum();
                        dot + w[self.input_dim]
                    })
                    .collect()
            })
            .collect();
        Ok(Forward { logits, hidden })
    }

    #[allow(clippy::cast_precision_loss)]
    fn step(&mut self, inputs: &[Vec<f64>], labels: &[u32], forward: &Forward) -> Result<()> {
        if inputs.is_empty() {
            return Ok(());
        }
        self.check_width(inputs)?;
        let stride = self.stride();
        let scale = 1.0 / inputs.len() as f64;
        let mut grad = vec![0.0; self.weights.len()];

        for ((row, &label), logits) in inputs.iter().zip(labels).zip(&forward.logits) {
            let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let exps: Vec<f64> = logits.iter().map(|v| (v - max).exp()).collect();
            let sum: f64 = exps.iter().sum();
            for (class, g) in grad.chunks_exact_mut(stride).enumerate() {
                let target = if class == label as usize { 1.0 } else { 0.0 };
                let delta = (exps[class] / sum - target) * scale;
                for (gi, x) in g[..self.input_dim].iter_mut().zip(row) {
                    *gi += delta * x;
                }
                g[self.input_dim] += delta;
            }
        }

        let ModelParams {
            learning_rate,
            momentum,
        } = self.params;
        for ((w, v), g) in self.weights.iter_mut().zip(&mut self.velocity).zip(&grad) {
            *v = momentum * *v + g;
            *w -= learning_rate * *v;
        }
        Ok(())
    }

    fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    fn is_training(&self) -> bool {
        self.training
    }

    fn snapshot(&self) -> ModelState {
        ModelState {
            model: NAME.to_string(),
            params: self.weights.clone(),
        }
    }

    fn restore(&mut self, state: &ModelState) -> Result<()> {
        if state.model != NAME || state.params.len() != self.weights.len() {
            return Err(Error::Model(format!(
                "Cannot restore {} with {} parameters into {NAME} with {}",
                state.model,
                state.params.len(),
                self.weights.len()
            )));
        }
        self.weights.clone_from(&state.params);
        self.velocity.iter_mut().for_each(|v| *v = 0.0);
        Ok(())
    }
}
