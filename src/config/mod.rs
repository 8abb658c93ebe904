mod devices;
mod paths;
mod train;

pub use devices::DeviceList;
pub use paths::RunPaths;
pub use train::{GpuSection, ProbeSection, TrainConfig, TrainSection};
