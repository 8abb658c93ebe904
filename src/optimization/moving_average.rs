use ndarray::Zip;

use crate::{
    error::Result,
    params::{ParamId, ParamKind, ParamSet},
};

/// The suffix of the shadow kept for every averaged parameter.
pub const SHADOW_SUFFIX: &str = "ExponentialMovingAverage";

/// Keeps exponential-moving-average shadows of every trainable parameter and
/// normalization statistic.
///
/// With `num_updates = n` the effective decay is `min(decay, (1 + n) / (10 + n))`,
/// so shadows follow the variables closely early in training.
#[derive(Debug)]
pub struct ExponentialMovingAverage {
    decay: f32,
    shadows: Vec<(ParamId, ParamId)>,
}

impl ExponentialMovingAverage {
    /// Creates a new tracker, registering a shadow initialized to the current value
    /// of every averaged parameter in `params`.
    ///
    /// # Arguments
    /// * `params` - The parameter set to attach to.
    /// * `decay` - The configured moving-average decay.
    ///
    /// # Returns
    /// A new `ExponentialMovingAverage` or an error if a shadow name is taken.
    pub fn new(params: &mut ParamSet, decay: f32) -> Result<Self> {
        let averaged: Vec<_> = params
            .iter()
            .filter(|(_, param)| param.kind().is_averaged())
            .map(|(id, param)| (id, param.name().to_string(), param.value().clone()))
            .collect();

        let mut shadows = Vec::with_capacity(averaged.len());
        for (id, name, value) in averaged {
            let name = format!("{name}/{SHADOW_SUFFIX}");
            let shadow = params.register(name, ParamKind::Shadow, value)?;
            shadows.push((id, shadow));
        }

        Ok(Self { decay, shadows })
    }

    /// The decay applied after `num_updates` updates.
    pub fn effective_decay(&self, num_updates: u64) -> f32 {
        let n = num_updates as f32;
        self.decay.min((1. + n) / (10. + n))
    }

    /// Moves every shadow towards it's variable: `s -= (1 - d) * (s - v)`.
    pub fn apply(&self, params: &mut ParamSet, num_updates: u64) {
        let d = self.effective_decay(num_updates);

        for &(id, shadow) in &self.shadows {
            let (value, shadow) = params.pair_mut(id, shadow);

            Zip::from(shadow).and(&*value).for_each(|s, &v| {
                *s -= (1. - d) * (*s - v);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn effective_decay_is_capped_early() {
        let mut params = ParamSet::new();
        let ema = ExponentialMovingAverage::new(&mut params, 0.9999).unwrap();

        assert!((ema.effective_decay(0) - 0.1).abs() < 1e-6);
        assert!((ema.effective_decay(1_000_000) - 0.9999).abs() < 1e-6);
    }

    #[test]
    fn shadows_follow_variables() {
        let mut params = ParamSet::new();
        let w = params
            .register("w", ParamKind::Trainable, arr1(&[0.0]).into_dyn())
            .unwrap();
        params
            .register("w/Momentum", ParamKind::OptimizerSlot, arr1(&[0.0]).into_dyn())
            .unwrap();

        let ema = ExponentialMovingAverage::new(&mut params, 0.5).unwrap();
        assert!(params.id("w/Momentum/ExponentialMovingAverage").is_none());

        params.assign(w, arr1(&[1.0]).into_dyn()).unwrap();
        ema.apply(&mut params, 100);

        let shadow = params.by_name("w/ExponentialMovingAverage").unwrap();
        assert!((shadow[0] - 0.5).abs() < 1e-6);
    }
}
