use ndarray::ArrayD;

use crate::{
    error::Result,
    params::{ParamId, ParamSet},
};

/// Defines the strategy for updating model parameters based on calculated gradients.
pub trait Optimizer {
    /// Updates the trainable parameters in `params` using the given gradients.
    ///
    /// # Arguments
    /// * `params` - The parameter set holding both the parameters and the optimizer's slots.
    /// * `grads` - One gradient per trainable parameter, keyed by it's id.
    /// * `learning_rate` - The learning rate for this step.
    ///
    /// # Returns
    /// An error if a gradient doesn't match it's parameter's shape or refers to an
    /// unknown parameter.
    fn apply_gradients(
        &mut self,
        params: &mut ParamSet,
        grads: &[(ParamId, ArrayD<f32>)],
        learning_rate: f32,
    ) -> Result<()>;
}
