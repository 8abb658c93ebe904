use std::fmt;

use super::Batch;
use crate::error::Result;

/// The dataset partition a feeder reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Split {
    Train,
    Val,
}

impl Split {
    /// The index file listing this split's samples.
    pub fn index_file(self) -> &'static str {
        match self {
            Split::Train => "train.txt",
            Split::Val => "val.txt",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Yields batches of labelled frames for a single split.
///
/// Feeders never run dry: once every sample was served they start a new pass.
pub trait DataFeeder {
    /// Returns the next `batch_size` samples as a batch.
    fn next_batch(&mut self, batch_size: usize) -> Result<Batch>;

    /// The amount of samples in one pass over the split.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
