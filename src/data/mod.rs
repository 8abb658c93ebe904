mod batch;
mod feeder;
mod in_memory;
mod tusimple;

pub use batch::{Batch, Sample};
pub use feeder::{DataFeeder, Split};
pub use in_memory::InMemoryFeeder;
pub use tusimple::TusimpleFeeder;
