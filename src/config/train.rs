use std::{fs, num::NonZeroUsize, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainErr};

const fn nz(n: usize) -> NonZeroUsize {
    match NonZeroUsize::new(n) {
        Some(n) => n,
        None => panic!("zero default"),
    }
}

/// The full training configuration.
///
/// Every field has a default, so a configuration file only needs to list the
/// values it overrides.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainConfig {
    pub train: TrainSection,
    pub gpu: GpuSection,
    pub probe: ProbeSection,
}

/// Schedule, optimizer and data settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainSection {
    /// Optimizer steps of a single-device run.
    pub steps: NonZeroUsize,
    /// Combined steps of a multi-device run.
    pub epochs: NonZeroUsize,
    pub train_size: NonZeroUsize,
    pub val_size: NonZeroUsize,
    pub batch_size: NonZeroUsize,
    pub val_batch_size: NonZeroUsize,
    pub learning_rate: f32,
    pub momentum: f32,
    pub display_step: NonZeroUsize,
    pub val_display_step: NonZeroUsize,
    pub moving_average_decay: f32,
    /// Epochs between timestamped checkpoints of a multi-device run.
    pub checkpoint_interval: NonZeroUsize,
    pub max_to_keep: NonZeroUsize,
    pub img_width: NonZeroUsize,
    pub img_height: NonZeroUsize,
    pub embedding_dims: NonZeroUsize,
    pub seed: u64,
    /// Dumps validation inputs and predictions as images at every validation pass.
    pub record_intermediate: bool,
}

impl Default for TrainSection {
    fn default() -> Self {
        Self {
            steps: nz(200_000),
            epochs: nz(80_010),
            train_size: nz(3268),
            val_size: nz(358),
            batch_size: nz(8),
            val_batch_size: nz(8),
            learning_rate: 0.0005,
            momentum: 0.9,
            display_step: nz(1),
            val_display_step: nz(1000),
            moving_average_decay: 0.9999,
            checkpoint_interval: nz(2000),
            max_to_keep: nz(10),
            img_width: nz(512),
            img_height: nz(256),
            embedding_dims: nz(4),
            seed: 1234,
            record_intermediate: false,
        }
    }
}

impl TrainSection {
    /// Batches in one training epoch, rounded up.
    pub fn steps_per_epoch(&self) -> usize {
        self.train_size.get().div_ceil(self.batch_size.get())
    }

    /// Batches in one full validation pass, rounded up.
    pub fn val_steps(&self) -> usize {
        self.val_size.get().div_ceil(self.val_batch_size.get())
    }

    /// The `(width, height)` frames are resized to.
    pub fn image_size(&self) -> (u32, u32) {
        let clamp = |v: NonZeroUsize| u32::try_from(v.get()).unwrap_or(u32::MAX);
        (clamp(self.img_width), clamp(self.img_height))
    }
}

/// Device memory settings. They are recorded with the run but the CPU runtime
/// has nothing to apply them to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GpuSection {
    pub memory_fraction: f32,
    pub allow_growth: bool,
}

impl Default for GpuSection {
    fn default() -> Self {
        Self {
            memory_fraction: 0.95,
            allow_growth: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeSection {
    /// Overrides the trunk width picked by the net flag.
    pub trunk_width: Option<NonZeroUsize>,
}

impl TrainConfig {
    /// Parses and validates a JSON configuration.
    ///
    /// # Returns
    /// The configuration, a `Json` error on malformed input or an `InvalidConfig`
    /// error on out of range values.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            if e.is_data() {
                TrainErr::InvalidConfig(e.to_string())
            } else {
                TrainErr::Json(e)
            }
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Reads a configuration file, see `from_json`.
    pub fn load(path: &Path) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Checks the ranges of the floating point settings.
    pub fn validate(&self) -> Result<()> {
        let t = &self.train;

        let checks = [
            (t.learning_rate > 0.0, "train.learning_rate must be positive"),
            (
                (0.0..1.0).contains(&t.momentum),
                "train.momentum must be in [0, 1)",
            ),
            (
                t.moving_average_decay > 0.0 && t.moving_average_decay <= 1.0,
                "train.moving_average_decay must be in (0, 1]",
            ),
            (
                self.gpu.memory_fraction > 0.0 && self.gpu.memory_fraction <= 1.0,
                "gpu.memory_fraction must be in (0, 1]",
            ),
        ];

        match checks.into_iter().find(|(ok, _)| !ok) {
            Some((_, msg)) => Err(TrainErr::InvalidConfig(msg.to_string())),
            None => Ok(()),
        }
    }

    /// Pretty JSON dump of the configuration for the startup log.
    pub fn to_pretty_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
