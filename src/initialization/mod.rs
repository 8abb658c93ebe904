mod constant;
mod error;
mod param_gen;
mod random;

pub use constant::ConstParamGen;
pub use error::{RandErr, Result};
pub use param_gen::ParamGen;
pub use random::RandParamGen;

use std::{cell::RefCell, rc::Rc};

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use serde::{Deserialize, Serialize};

/// How a parameter tensor is filled when it is randomly initialized.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InitSpec {
    Const { value: f32 },
    Normal { mean: f32, std_dev: f32 },
    XavierUniform { fan_in: usize, fan_out: usize },
    Kaiming { fan_in: usize },
}

impl InitSpec {
    /// Builds the generator for this spec.
    ///
    /// # Arguments
    /// * `rng` - The random number generator shared by every parameter.
    ///
    /// # Returns
    /// A boxed generator or a `RandErr` if the distribution is invalid.
    pub fn generator<R>(&self, rng: &Rc<RefCell<R>>) -> Result<Box<dyn ParamGen>>
    where
        R: Rng + 'static,
    {
        let rng = Rc::clone(rng);

        let param_gen: Box<dyn ParamGen> = match *self {
            InitSpec::Const { value } => Box::new(ConstParamGen(value)),
            InitSpec::Normal { mean, std_dev } => Box::new(RandParamGen::normal(rng, mean, std_dev)?),
            InitSpec::XavierUniform { fan_in, fan_out } => {
                Box::new(RandParamGen::xavier_uniform(rng, fan_in, fan_out)?)
            }
            InitSpec::Kaiming { fan_in } => Box::new(RandParamGen::kaiming(rng, fan_in)?),
        };

        Ok(param_gen)
    }

    /// Builds a tensor of the given shape filled by this spec.
    pub fn tensor<R>(&self, rng: &Rc<RefCell<R>>, shape: &[usize]) -> Result<ArrayD<f32>>
    where
        R: Rng + 'static,
    {
        let mut value = ArrayD::zeros(IxDyn(shape));
        self.generator(rng)?.fill(value.view_mut());
        Ok(value)
    }
}
