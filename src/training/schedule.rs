/// Polynomial learning rate decay.
///
/// `lr(step) = (base - end) * (1 - step / decay_steps) ^ power + end`
///
/// Without `cycle` the step is clamped to `decay_steps`, so the rate stays at
/// `end` afterwards. With `cycle`, `decay_steps` is stretched to the next multiple
/// that covers the step, restarting the decay every period.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialDecay {
    base_lr: f32,
    decay_steps: f64,
    end_lr: f32,
    power: f64,
    cycle: bool,
}

impl PolynomialDecay {
    pub const POWER: f64 = 0.9;
    /// The end rate of the multi-device schedule.
    pub const MULTI_DEVICE_END_LR: f32 = 0.0001;

    pub fn new(base_lr: f32, decay_steps: f64, end_lr: f32, power: f64, cycle: bool) -> Self {
        Self {
            base_lr,
            decay_steps,
            end_lr,
            power,
            cycle,
        }
    }

    /// The cyclic schedule of a single-device run: four decay periods over the
    /// whole run, ending at a tenth of the base rate.
    pub fn single_device(base_lr: f32, total_steps: usize) -> Self {
        Self::new(
            base_lr,
            total_steps as f64 / 4.0,
            base_lr / 10.0,
            Self::POWER,
            true,
        )
    }

    /// The schedule of a multi-device run: a single decay over every epoch.
    pub fn multi_device(base_lr: f32, epochs: usize) -> Self {
        Self::new(
            base_lr,
            epochs as f64,
            Self::MULTI_DEVICE_END_LR,
            Self::POWER,
            false,
        )
    }

    pub fn decay_steps(&self) -> f64 {
        self.decay_steps
    }

    pub fn end_lr(&self) -> f32 {
        self.end_lr
    }

    /// Returns the learning rate at `global_step`.
    pub fn learning_rate(&self, global_step: u64) -> f32 {
        let step = global_step as f64;

        let (step, decay_steps) = if self.cycle {
            let periods = if step > 0.0 {
                (step / self.decay_steps).ceil()
            } else {
                1.0
            };
            (step, self.decay_steps * periods)
        } else {
            (step.min(self.decay_steps), self.decay_steps)
        };

        if decay_steps <= 0.0 {
            return self.end_lr;
        }

        let remaining = 1.0 - step / decay_steps;
        let range = f64::from(self.base_lr - self.end_lr);
        (range * remaining.powf(self.power) + f64::from(self.end_lr)) as f32
    }
}
