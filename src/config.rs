//! Run configuration
//!
//! A [`RunConfig`] is built once and never mutated afterwards: either from
//! defaults plus a map of overrides ([`RunConfig::with_overrides`], pure) or
//! from a config file layered over the defaults and `FAIRSHARE_*`
//! environment variables ([`RunConfig::load`]).

use crate::model::{FeatureSpec, ModelKind, ModelParams};
use crate::trial::TrialPolicy;
use crate::train::{TrainOptions, EPOCHS_MAX};
use crate::{Error, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Seed used when runs must be reproducible.
pub const DEFAULT_SEED: u64 = 1337;

/// Keys that do not change the trained model and are left out of
/// [`RunConfig::identifier`].
const NON_MODEL_KEYS: [&str; 6] = ["data_dir", "sims", "out_dir", "tmp_dir", "regen_data", "sync"];

/// Environment variable prefix for [`RunConfig::load`].
pub const ENV_PREFIX: &str = "FAIRSHARE";

/// Everything one configuration run needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Directory holding the raw simulations.
    pub data_dir: PathBuf,
    /// Explicit simulations to use instead of listing `data_dir`.
    pub sims: Vec<PathBuf>,
    /// Number of simulations to use (all when unset).
    pub num_sims: Option<usize>,
    /// Percentage of each simulation's leading rows to drop.
    pub warmup_percent: f64,
    /// Percentage of each simulation's rows to keep.
    pub keep_percent: f64,
    /// Standardize (true) or range-scale (false) the inputs.
    pub standardize: bool,
    /// Registry name of the model.
    pub model: String,
    /// Input features overriding the model's defaults.
    pub features: Vec<String>,
    /// Training epochs (ignored when early stopping).
    pub epochs: usize,
    /// Training batch size.
    pub train_batch: usize,
    /// Validation/test batch size.
    pub test_batch: usize,
    /// SGD learning rate.
    pub learning_rate: f64,
    /// SGD momentum.
    pub momentum: f64,
    /// Stop on validation loss.
    pub early_stop: bool,
    /// Non-improving validations tolerated.
    pub val_patience: usize,
    /// Minimum relative validation improvement, in percent.
    pub val_improvement_thresh: f64,
    /// Training timeout in seconds (0 disables).
    pub timeout_s: u64,
    /// Successful trials wanted.
    pub conf_trials: usize,
    /// Attempts allowed in total.
    pub max_attempts: usize,
    /// Use `seed` everywhere instead of fresh entropy.
    pub no_rand: bool,
    /// Seed used when `no_rand` is set.
    pub seed: u64,
    /// Output directory for the dataset, parameters and models.
    pub out_dir: PathBuf,
    /// Scratch root (defaults to `out_dir/tmp`).
    pub tmp_dir: Option<PathBuf>,
    /// Rebuild the dataset even if one exists.
    pub regen_data: bool,
    /// Ingest simulations sequentially.
    pub sync: bool,
    /// Training-loss log points per epoch.
    pub logs_per_epoch: usize,
    /// Validations per epoch.
    pub vals_per_epoch: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            sims: Vec::new(),
            num_sims: None,
            warmup_percent: 0.0,
            keep_percent: 100.0,
            standardize: true,
            model: ModelKind::SoftmaxRegression.name().to_string(),
            features: Vec::new(),
            epochs: 100,
            train_batch: 10,
            test_batch: 10_000,
            learning_rate: 0.001,
            momentum: 0.9,
            early_stop: false,
            val_patience: 10,
            val_improvement_thresh: 0.1,
            timeout_s: 0,
            conf_trials: 1,
            max_attempts: 10,
            no_rand: false,
            seed: DEFAULT_SEED,
            out_dir: PathBuf::from("."),
            tmp_dir: None,
            regen_data: false,
            sync: false,
            logs_per_epoch: 5,
            vals_per_epoch: 15,
        }
    }
}

impl RunConfig {
    /// Defaults with `overrides` applied.
    ///
    /// # Errors
    ///
    /// Returns error for unknown keys, ill-typed values, or an invalid
    /// resulting configuration.
    pub fn with_overrides(&self, overrides: &Map<String, Value>) -> Result<Self> {
        let Value::Object(mut merged) = serde_json::to_value(self)? else {
            return Err(Error::InvalidInput("Configuration is not an object".to_string()));
        };
        for (key, value) in overrides {
            if !merged.contains_key(key) {
                return Err(Error::InvalidInput(format!("Unknown option: {key}")));
            }
            merged.insert(key.clone(), value.clone());
        }
        let config: Self = serde_json::from_value(Value::Object(merged))?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then `path`, then `FAIRSHARE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or the result is invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(&Self::default())?)
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns error naming the first invalid option.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidInput(msg.to_string()));
        if !(0.0..100.0).contains(&self.warmup_percent) {
            return invalid("warmup_percent must be in [0, 100)");
        }
        if !(self.keep_percent > 0.0 && self.keep_percent.is_finite()) {
            return invalid("keep_percent must be positive");
        }
        if self.train_batch == 0 || self.test_batch == 0 {
            return invalid("batch sizes must be positive");
        }
        if self.conf_trials == 0 || self.max_attempts == 0 {
            return invalid("conf_trials and max_attempts must be positive");
        }
        if self.early_stop && self.vals_per_epoch == 0 {
            return invalid("early_stop requires vals_per_epoch > 0");
        }
        self.model_kind().map(|_| ())
    }

    /// The configured model kind.
    ///
    /// # Errors
    ///
    /// Returns error if the model name is not registered.
    pub fn model_kind(&self) -> Result<ModelKind> {
        self.model.parse()
    }

    /// The model's feature spec, with `features` applied.
    ///
    /// # Errors
    ///
    /// Returns error if the model name is not registered.
    pub fn feature_spec(&self) -> Result<FeatureSpec> {
        let spec = self.model_kind()?.feature_spec();
        Ok(if self.features.is_empty() {
            spec
        } else {
            spec.with_inputs(self.features.clone())
        })
    }

    /// Epoch bound actually used for training.
    #[must_use]
    pub const fn effective_epochs(&self) -> usize {
        if self.early_stop {
            EPOCHS_MAX
        } else {
            self.epochs
        }
    }

    /// Optimizer settings.
    #[must_use]
    pub const fn model_params(&self) -> ModelParams {
        ModelParams {
            learning_rate: self.learning_rate,
            momentum: self.momentum,
        }
    }

    /// Trial policy.
    #[must_use]
    pub const fn trial_policy(&self) -> TrialPolicy {
        TrialPolicy {
            conf_trials: self.conf_trials,
            max_attempts: self.max_attempts,
        }
    }

    /// Training options, persisting the model to [`RunConfig::model_path`].
    #[must_use]
    pub fn train_options(&self, seed: u64) -> TrainOptions {
        TrainOptions {
            epochs: self.effective_epochs(),
            train_batch: self.train_batch,
            test_batch: self.test_batch,
            early_stop: self.early_stop,
            val_patience: self.val_patience,
            val_improvement_thresh: self.val_improvement_thresh,
            timeout: (self.timeout_s > 0).then(|| Duration::from_secs(self.timeout_s)),
            logs_per_epoch: self.logs_per_epoch,
            vals_per_epoch: self.vals_per_epoch,
            seed,
            model_path: Some(self.model_path()),
        }
    }

    /// Deterministic, filesystem-safe name derived from every option that
    /// affects the trained model, in sorted key order.
    #[must_use]
    pub fn identifier(&self) -> String {
        let Ok(Value::Object(map)) = serde_json::to_value(self) else {
            return self.model.clone();
        };
        let mut keys: Vec<&String> = map.keys().collect();
        keys.sort();
        keys.into_iter()
            .filter(|key| !NON_MODEL_KEYS.contains(&key.as_str()))
            .map(|key| format!("{key}-{}", id_value(&map[key])))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Where the trained model is written.
    #[must_use]
    pub fn model_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.model.json", self.identifier()))
    }

    /// Where the trial tracking store is written.
    #[must_use]
    pub fn trials_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}.trials.json", self.identifier()))
    }

    /// Directory for this configuration's scratch files, under `tmp_dir`
    /// (or `out_dir/tmp`) and named by [`RunConfig::identifier`].
    #[must_use]
    pub fn scratch_dir(&self) -> PathBuf {
        self.tmp_dir
            .clone()
            .unwrap_or_else(|| self.out_dir.join("tmp"))
            .join(self.identifier())
    }
}

// Lists are reduced to a short content hash to keep names bounded.
fn id_value(value: &Value) -> String {
    let raw = match value {
        Value::Null => "none".to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => "none".to_string(),
        Value::Array(_) | Value::Object(_) => {
            let digest = Sha256::digest(value.to_string().as_bytes());
            hex::encode(&digest[..4])
        }
        other => other.to_string(),
    };
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect()
}
