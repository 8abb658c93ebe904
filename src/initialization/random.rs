use std::{cell::RefCell, rc::Rc};

use ndarray::ArrayViewMutD;
use rand::Rng;
use rand_distr::{Distribution, Normal, Uniform};

use super::{ParamGen, RandErr, Result};

/// Fills tensors with draws from a distribution.
///
/// Every generator of a model borrows the same rng, so a seed pins the whole
/// initial parameter set.
pub struct RandParamGen<R: Rng, D: Distribution<f32>> {
    rng: Rc<RefCell<R>>,
    distribution: D,
}

impl<R: Rng, D: Distribution<f32>> RandParamGen<R, D> {
    pub fn new(rng: Rc<RefCell<R>>, distribution: D) -> Self {
        Self { rng, distribution }
    }
}

impl<R: Rng> RandParamGen<R, Uniform<f32>> {
    /// Draws uniformly from `[low, high)`.
    ///
    /// # Returns
    /// An error if `low >= high` or either bound isn't finite.
    pub fn uniform(rng: Rc<RefCell<R>>, low: f32, high: f32) -> Result<Self> {
        let distribution = Uniform::new(low, high).map_err(|e| RandErr::new("uniform", e))?;
        Ok(Self::new(rng, distribution))
    }

    /// Glorot uniform: `U(-r, r)` with `r = sqrt(6 / (fan_in + fan_out))`.
    ///
    /// # Arguments
    /// * `rng` - The shared random number generator.
    /// * `fan_in` - The inputs of the layer.
    /// * `fan_out` - The outputs of the layer.
    ///
    /// # Returns
    /// An error if both fans are zero.
    pub fn xavier_uniform(rng: Rc<RefCell<R>>, fan_in: usize, fan_out: usize) -> Result<Self> {
        let fans = fan_in + fan_out;
        if fans == 0 {
            return Err(RandErr::zero_fan("xavier_uniform"));
        }

        let range = (6. / fans as f32).sqrt();
        let distribution =
            Uniform::new(-range, range).map_err(|e| RandErr::new("xavier_uniform", e))?;
        Ok(Self::new(rng, distribution))
    }
}

impl<R: Rng> RandParamGen<R, Normal<f32>> {
    /// Draws from `N(mean, std_dev)`.
    ///
    /// # Returns
    /// An error if `std_dev` is negative or not finite.
    pub fn normal(rng: Rc<RefCell<R>>, mean: f32, std_dev: f32) -> Result<Self> {
        let distribution = Normal::new(mean, std_dev).map_err(|e| RandErr::new("normal", e))?;
        Ok(Self::new(rng, distribution))
    }

    /// He normal: `N(0, sqrt(2 / fan_in))`, for layers followed by a ReLU.
    ///
    /// # Returns
    /// An error if `fan_in` is zero.
    pub fn kaiming(rng: Rc<RefCell<R>>, fan_in: usize) -> Result<Self> {
        if fan_in == 0 {
            return Err(RandErr::zero_fan("kaiming"));
        }

        let std_dev = (2. / fan_in as f32).sqrt();
        let distribution = Normal::new(0., std_dev).map_err(|e| RandErr::new("kaiming", e))?;
        Ok(Self::new(rng, distribution))
    }
}

impl<R: Rng, D: Distribution<f32>> ParamGen for RandParamGen<R, D> {
    fn fill(&mut self, mut values: ArrayViewMutD<f32>) {
        let mut rng = self.rng.borrow_mut();
        values.map_inplace(|v| *v = self.distribution.sample(&mut *rng));
    }
}
