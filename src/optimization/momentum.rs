use std::collections::HashMap;

use ndarray::{ArrayD, Zip};

use super::Optimizer;
use crate::{
    error::{Result, TrainErr},
    params::{ParamId, ParamKind, ParamSet},
};

/// The suffix of the velocity slot kept for every trainable parameter.
pub const MOMENTUM_SLOT_SUFFIX: &str = "Momentum";

/// Gradient descent with momentum: `v = mu * v + g; p -= lr * v`.
///
/// The velocities live inside the `ParamSet` as `OptimizerSlot` entries named
/// `<param>/Momentum`, so they are checkpointed together with the model.
#[derive(Debug)]
pub struct MomentumOptimizer {
    momentum: f32,
    slots: HashMap<ParamId, ParamId>,
}

impl MomentumOptimizer {
    /// Creates a new `MomentumOptimizer`, registering a zeroed velocity slot for
    /// every trainable parameter in `params`.
    ///
    /// # Arguments
    /// * `params` - The parameter set to attach to.
    /// * `momentum` - Hyperparameter to the optimization algorithm.
    ///
    /// # Returns
    /// A new `MomentumOptimizer` instance or an error if a slot name is taken.
    pub fn new(params: &mut ParamSet, momentum: f32) -> Result<Self> {
        let mut slots = HashMap::new();

        for id in params.ids_of_kind(ParamKind::Trainable) {
            let param = params.param(id);
            let name = format!("{}/{MOMENTUM_SLOT_SUFFIX}", param.name());
            let zeros = ArrayD::zeros(param.value().raw_dim());

            let slot = params.register(name, ParamKind::OptimizerSlot, zeros)?;
            slots.insert(id, slot);
        }

        Ok(Self { momentum, slots })
    }

    pub fn momentum(&self) -> f32 {
        self.momentum
    }
}

impl Optimizer for MomentumOptimizer {
    fn apply_gradients(
        &mut self,
        params: &mut ParamSet,
        grads: &[(ParamId, ArrayD<f32>)],
        learning_rate: f32,
    ) -> Result<()> {
        let lr = learning_rate;
        let mu = self.momentum;

        for (id, grad) in grads {
            let Some(&slot) = self.slots.get(id) else {
                return Err(TrainErr::UnknownParam(params.param(*id).name().to_string()));
            };

            if params.get(*id).shape() != grad.shape() {
                return Err(TrainErr::ShapeMismatch {
                    name: params.param(*id).name().to_string(),
                    got: grad.shape().to_vec(),
                    expected: params.get(*id).shape().to_vec(),
                });
            }

            let (param, velocity) = params.pair_mut(*id, slot);

            Zip::from(param)
                .and(velocity)
                .and(grad)
                .for_each(|p, v, &g| {
                    *v = (mu * *v) + g;
                    *p -= lr * *v;
                });
        }

        Ok(())
    }
}
