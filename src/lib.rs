//! LaneNet training orchestration on the TuSimple lane dataset.
//!
//! The crate drives a two-headed lane segmentation network through single- or
//! multi-device data-parallel training: polynomial learning rate decay with
//! momentum, tower gradient averaging, a NaN guard, periodic validation with
//! best-model retention, safetensors checkpoints and JSON-lines summaries.

pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod initialization;
pub mod metrics;
pub mod model;
pub mod optimization;
pub mod params;
pub mod summary;
pub mod training;

pub use error::{Result, TrainErr};
pub use model::{LaneNet, LinearProbe, NetFlag};
pub use params::{ParamId, ParamKind, ParamSet};
pub use training::{MultiDeviceTrainer, RunOutcome, SingleDeviceTrainer, TrainerParts};
