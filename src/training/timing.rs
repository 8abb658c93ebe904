use std::time::Duration;

/// Accumulates the wall-clock time of the intervals between two log lines.
#[derive(Debug, Default, Clone)]
pub struct IntervalTimer {
    total: Duration,
    samples: u32,
}

impl IntervalTimer {
    #[inline]
    pub fn record(&mut self, elapsed: Duration) {
        self.total += elapsed;
        self.samples += 1;
    }

    /// The mean recorded time in seconds, `0.0` if nothing was recorded.
    pub fn mean_secs(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        self.total.as_secs_f64() / f64::from(self.samples)
    }

    #[inline]
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
