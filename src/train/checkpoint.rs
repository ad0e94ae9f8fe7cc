//! Two-slot checkpoint: the live model plus the best snapshot.

use crate::model::{Model, ModelState};
use crate::Result;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Best-so-far snapshot of a model, optionally mirrored to disk.
///
/// Rollback copies the in-memory snapshot back into the live model; the
/// file is only written, never read back during training.
#[derive(Debug, Default)]
pub struct Checkpoint {
    best: Option<ModelState>,
    path: Option<PathBuf>,
}

impl Checkpoint {
    /// Create an empty checkpoint that persists to `path` when set.
    #[must_use]
    pub const fn new(path: Option<PathBuf>) -> Self {
        Self { best: None, path }
    }

    /// Snapshot `model` as the new best and persist it.
    ///
    /// # Errors
    ///
    /// Returns error if the snapshot cannot be written.
    pub fn record(&mut self, model: &dyn Model) -> Result<()> {
        let state = model.snapshot();
        self.persist(&state)?;
        self.best = Some(state);
        Ok(())
    }

    /// Copy the best snapshot back into `model`.
    ///
    /// Returns `false` if nothing has been recorded yet.
    ///
    /// # Errors
    ///
    /// Returns error if the model rejects the snapshot.
    pub fn rollback(&self, model: &mut dyn Model) -> Result<bool> {
        match &self.best {
            Some(state) => {
                model.restore(state)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Write `state` to the checkpoint path, if there is one.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub fn persist(&self, state: &ModelState) -> Result<()> {
        if let Some(path) = &self.path {
            debug!("Saving model to {}", path.display());
            state.save(path)?;
        }
        Ok(())
    }

    /// The best snapshot, if any.
    #[must_use]
    pub const fn best(&self) -> Option<&ModelState> {
        self.best.as_ref()
    }

    /// Where snapshots are persisted.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeatureSpec, NearestCentroid};

    #[test]
    fn test_record_and_rollback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.model.json");
        let mut checkpoint = Checkpoint::new(Some(path.clone()));
        let mut model = NearestCentroid::new(FeatureSpec::fairness(), 1);

        assert!(!checkpoint.rollback(&mut model).unwrap());

        model.fit(&[vec![1.0]], &[0]).unwrap();
        checkpoint.record(&model).unwrap();
        assert!(path.exists());

        model.fit(&[vec![9.0]], &[4]).unwrap();
        assert!(checkpoint.rollback(&mut model).unwrap());
        assert_eq!(Some(&model.snapshot()), checkpoint.best());
        assert_eq!(ModelState::load(&path).unwrap(), model.snapshot());
    }
}
