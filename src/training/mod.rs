//! Training orchestration: the single- and multi-device loops plus the pieces
//! they share (schedules, retention, validation, tower averaging).

mod guard;
mod init;
mod multi;
mod retention;
mod schedule;
mod single;
mod state;
mod summaries;
mod timing;
mod towers;
mod validation;

pub use guard::losses_diverged;
pub use init::InitPolicy;
pub use multi::{MultiDeviceTrainer, timestamped_model_name};
pub use retention::BestModelPolicy;
pub use schedule::PolynomialDecay;
pub use single::SingleDeviceTrainer;
pub use state::TrainingState;
pub use timing::IntervalTimer;
pub use towers::{TowerGrads, apply_norm_updates, average_gradients};
pub use validation::{ValidationOutcome, ValidationPass, ValidationReport};

use crate::{checkpoint::CheckpointStore, data::DataFeeder, summary::SummarySink};

/// How a training run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every step or epoch was run.
    Completed,
    /// A guarded loss turned NaN at `step`; nothing was applied or saved for it.
    Diverged { step: u64 },
}

/// The collaborators a trainer drives.
pub struct TrainerParts<M> {
    pub model: M,
    pub train_feeder: Box<dyn DataFeeder>,
    pub val_feeder: Box<dyn DataFeeder>,
    pub checkpoints: Box<dyn CheckpointStore>,
    pub summaries: Box<dyn SummarySink>,
}
