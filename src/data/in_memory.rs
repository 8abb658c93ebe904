use super::{Batch, DataFeeder, Sample};
use crate::error::{Result, TrainErr};

/// A feeder over samples already held in memory, cycling through them in order.
#[derive(Debug, Clone)]
pub struct InMemoryFeeder {
    samples: Vec<Sample>,
    cursor: usize,
}

impl InMemoryFeeder {
    /// Creates a new `InMemoryFeeder`.
    ///
    /// # Returns
    /// The feeder, or a `Dataset` error if `samples` is empty.
    pub fn new(samples: Vec<Sample>) -> Result<Self> {
        if samples.is_empty() {
            return Err(TrainErr::Dataset("in-memory split has no samples".into()));
        }

        Ok(Self { samples, cursor: 0 })
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}

impl DataFeeder for InMemoryFeeder {
    fn next_batch(&mut self, batch_size: usize) -> Result<Batch> {
        let total = self.samples.len();

        let picked: Vec<Sample> = (0..batch_size)
            .map(|i| self.samples[(self.cursor + i) % total].clone())
            .collect();

        self.cursor = (self.cursor + batch_size) % total;
        Batch::from_samples(&picked)
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};

    fn sample(fill: f32) -> Sample {
        Sample::new(
            Array3::from_elem((1, 1, 3), fill),
            Array2::zeros((1, 1)),
            Array2::zeros((1, 1)),
        )
        .unwrap()
    }

    #[test]
    fn batches_wrap_around() {
        let mut feeder = InMemoryFeeder::new(vec![sample(0.0), sample(1.0), sample(2.0)]).unwrap();

        let first = feeder.next_batch(2).unwrap();
        assert_eq!(first.images()[[1, 0, 0, 0]], 1.0);

        let second = feeder.next_batch(2).unwrap();
        assert_eq!(second.images()[[0, 0, 0, 0]], 2.0);
        assert_eq!(second.images()[[1, 0, 0, 0]], 0.0);

        feeder.reset();
        assert_eq!(feeder.next_batch(1).unwrap().images()[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn empty_feeder_is_rejected() {
        assert!(InMemoryFeeder::new(Vec::new()).is_err());
    }
}
