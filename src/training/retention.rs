/// Decides which validation results are worth keeping a checkpoint of.
///
/// A result qualifies when it beats the current bar. The first `warmup`
/// qualifying results are saved but put the bar back to the floor, so an early
/// lucky pass doesn't lock out the ones that follow.
#[derive(Debug, Clone, PartialEq)]
pub struct BestModelPolicy {
    floor: f32,
    warmup: u32,
    max_accuracy: f32,
    saved_count: u32,
}

impl BestModelPolicy {
    pub const ACCURACY_FLOOR: f32 = 0.9;
    pub const WARMUP_SAVES: u32 = 3;

    pub fn new(floor: f32, warmup: u32) -> Self {
        Self {
            floor,
            warmup,
            max_accuracy: floor,
            saved_count: 0,
        }
    }

    /// Weighs a new mean validation accuracy.
    ///
    /// # Returns
    /// Whether a checkpoint tagged with `accuracy` must be saved.
    pub fn consider(&mut self, accuracy: f32) -> bool {
        if accuracy <= self.max_accuracy {
            return false;
        }

        self.max_accuracy = accuracy;
        if self.saved_count < self.warmup {
            self.max_accuracy = self.floor;
        }

        self.saved_count += 1;
        true
    }

    /// The accuracy the next result has to beat.
    pub fn max_accuracy(&self) -> f32 {
        self.max_accuracy
    }

    pub fn saved_count(&self) -> u32 {
        self.saved_count
    }
}

impl Default for BestModelPolicy {
    fn default() -> Self {
        Self::new(Self::ACCURACY_FLOOR, Self::WARMUP_SAVES)
    }
}
