/// The progress of a training run, updated once per step or epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingState {
    /// The loop step (single device) or epoch (multi device) being run.
    pub current_step: u64,
    /// The learning rate applied by the last update.
    pub learning_rate: f32,
    pub best_validation_accuracy: f32,
    pub checkpoints_saved_count: u32,
}
