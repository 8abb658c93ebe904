use std::path::PathBuf;

use log::{info, warn};

use crate::{
    checkpoint::{CheckpointStore, RestoreReport, RestoreScope, resolve_checkpoint},
    error::Result,
    params::ParamSet,
};

/// Where the initial parameters of a run come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitPolicy {
    /// Every parameter keeps it's random initial value.
    Random,
    /// Random initialization, then every tensor found in the checkpoint except
    /// the optimizer state and the global step.
    Scratch(PathBuf),
    /// Resume a previous run: parameters, optimizer state and global step.
    Continue(PathBuf),
}

impl InitPolicy {
    /// Picks the policy for the given prior weights.
    pub fn new(weights_path: Option<PathBuf>, scratch: bool) -> Self {
        match weights_path {
            None => Self::Random,
            Some(path) if scratch => Self::Scratch(path),
            Some(path) => Self::Continue(path),
        }
    }

    /// Applies the policy to a randomly initialized parameter set.
    ///
    /// A failed restore leaves `params` untouched, so training goes on from the
    /// random initialization.
    ///
    /// # Arguments
    /// * `params` - The randomly initialized parameters.
    /// * `store` - The store to read the prior weights from.
    ///
    /// # Returns
    /// What the restore did, `None` if nothing was restored, or `WeightsNotFound`
    /// if the prior weights don't exist.
    pub fn apply(
        &self,
        params: &mut ParamSet,
        store: &dyn CheckpointStore,
    ) -> Result<Option<RestoreReport>> {
        let (path, scope) = match self {
            Self::Random => {
                info!("Training from scratch");
                return Ok(None);
            }
            Self::Scratch(path) => (path, RestoreScope::Scratch),
            Self::Continue(path) => (path, RestoreScope::Full),
        };

        let path = resolve_checkpoint(path)?;
        match scope {
            RestoreScope::Scratch => info!(
                "Restore model from last model checkpoint {}, scratch",
                path.display()
            ),
            RestoreScope::Full => info!("Restore model from last model checkpoint {}", path.display()),
        }

        match store.restore(params, &path, scope) {
            Ok(report) => {
                if !report.missing.is_empty() {
                    warn!(
                        "{} parameters are missing from {}, they keep their initial value",
                        report.missing.len(),
                        path.display()
                    );
                }
                if let Some(step) = report.global_step {
                    info!("resuming from global step {step}");
                }
                Ok(Some(report))
            }
            Err(e) => {
                warn!(
                    "failed to restore {}, training from the random initialization: {e}",
                    path.display()
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{checkpoint::SafetensorsCheckpointer, error::TrainErr, params::ParamKind};
    use ndarray::arr1;

    fn params(value: f32) -> ParamSet {
        let mut params = ParamSet::new();
        params
            .register("w", ParamKind::Trainable, arr1(&[value]).into_dyn())
            .unwrap();
        params
            .register("w/Momentum", ParamKind::OptimizerSlot, arr1(&[value]).into_dyn())
            .unwrap();
        params
    }

    #[test]
    fn policy_follows_arguments() {
        assert_eq!(InitPolicy::new(None, true), InitPolicy::Random);
        assert_eq!(
            InitPolicy::new(Some("a".into()), true),
            InitPolicy::Scratch("a".into())
        );
        assert_eq!(
            InitPolicy::new(Some("a".into()), false),
            InitPolicy::Continue("a".into())
        );
    }

    #[test]
    fn missing_weights_fail_before_training() {
        let dir = tempfile::tempdir().unwrap();
        let store = SafetensorsCheckpointer::new(dir.path(), 2).unwrap();
        let policy = InitPolicy::Continue(dir.path().join("absent"));

        let err = policy.apply(&mut params(0.0), &store).unwrap_err();
        assert!(matches!(err, TrainErr::WeightsNotFound(_)));
    }

    #[test]
    fn scratch_skips_optimizer_state_and_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SafetensorsCheckpointer::new(dir.path(), 2).unwrap();
        let path = store.save(&params(7.0), "prior", 42).unwrap();

        let mut fresh = params(0.0);
        let report = InitPolicy::Scratch(path).apply(&mut fresh, &store).unwrap().unwrap();

        assert_eq!(report.global_step, None);
        assert_eq!(fresh.by_name("w").unwrap()[[0]], 7.0);
        assert_eq!(fresh.by_name("w/Momentum").unwrap()[[0]], 0.0);
        assert_eq!(fresh.global_step(), 0);
    }

    #[test]
    fn failed_continue_keeps_random_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SafetensorsCheckpointer::new(dir.path(), 2).unwrap();

        let mut other = ParamSet::new();
        other
            .register("other", ParamKind::Trainable, arr1(&[1.0]).into_dyn())
            .unwrap();
        let path = store.save(&other, "other", 3).unwrap();

        let mut fresh = params(0.5);
        let report = InitPolicy::Continue(path).apply(&mut fresh, &store).unwrap();

        assert!(report.is_none());
        assert_eq!(fresh.by_name("w").unwrap()[[0]], 0.5);
    }
}
