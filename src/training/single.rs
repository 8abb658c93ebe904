use std::{path::PathBuf, time::Instant};

use log::{debug, info};
use rand::{SeedableRng, rngs::StdRng};

use super::{
    BestModelPolicy, InitPolicy, IntervalTimer, PolynomialDecay, RunOutcome, TrainerParts,
    TrainingState, ValidationOutcome, ValidationPass, ValidationReport, guard::losses_diverged,
    summaries::record_batch, towers::apply_norm_updates,
};
use crate::{
    config::{TrainConfig, TrainSection},
    error::Result,
    metrics::SegMetrics,
    model::LaneNet,
    optimization::{MomentumOptimizer, Optimizer},
    params::ParamSet,
};

/// Trains on a single device, validating every `val_display_step` steps and
/// keeping a checkpoint of every validation result the retention policy accepts.
pub struct SingleDeviceTrainer<M> {
    config: TrainSection,
    parts: TrainerParts<M>,
    params: ParamSet,
    optimizer: MomentumOptimizer,
    schedule: PolynomialDecay,
    retention: BestModelPolicy,
    state: TrainingState,
    intermediate_dir: Option<PathBuf>,
}

impl<M: LaneNet> SingleDeviceTrainer<M> {
    /// Creates a new `SingleDeviceTrainer`.
    ///
    /// # Arguments
    /// * `config` - The training configuration.
    /// * `parts` - The model, feeders and sinks to drive.
    /// * `init` - Where the initial parameters come from.
    ///
    /// # Returns
    /// The ready trainer, or an error if the parameters can't be built or the
    /// prior weights don't exist.
    pub fn new(config: &TrainConfig, parts: TrainerParts<M>, init: &InitPolicy) -> Result<Self> {
        let config = config.train.clone();

        let specs = parts.model.param_specs();
        let mut params = ParamSet::initialize(&specs, StdRng::seed_from_u64(config.seed))?;
        let optimizer = MomentumOptimizer::new(&mut params, config.momentum)?;
        init.apply(&mut params, parts.checkpoints.as_ref())?;

        let schedule = PolynomialDecay::single_device(config.learning_rate, config.steps.get());
        let retention = BestModelPolicy::default();
        let state = TrainingState {
            best_validation_accuracy: retention.max_accuracy(),
            ..TrainingState::default()
        };

        Ok(Self {
            config,
            parts,
            params,
            optimizer,
            schedule,
            retention,
            state,
            intermediate_dir: None,
        })
    }

    /// Dumps the first validation batch of every pass to `dir`.
    pub fn with_intermediate_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.intermediate_dir = Some(dir.into());
        self
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Runs every configured step.
    ///
    /// # Returns
    /// `Completed`, or `Diverged` as soon as a training or validation loss turns
    /// NaN.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let steps = self.config.steps.get() as u64;
        let steps_per_epoch = self.config.steps_per_epoch() as u64;
        let display_step = self.config.display_step.get() as u64;
        let val_display_step = self.config.val_display_step.get() as u64;
        let mut timer = IntervalTimer::default();

        for step in 0..steps {
            self.state.current_step = step;
            let started = Instant::now();

            let batch = self.parts.train_feeder.next_batch(self.config.batch_size.get())?;
            let tower = self.parts.model.compute_gradients(&self.params, &batch)?;
            let losses = tower.outputs.losses;

            if losses_diverged(&losses) {
                return Ok(RunOutcome::Diverged { step });
            }

            let lr = self.schedule.learning_rate(self.params.global_step());
            apply_norm_updates(&mut self.params, tower.norm_updates)?;
            self.optimizer.apply_gradients(&mut self.params, &tower.grads, lr)?;
            self.params.increment_global_step();
            self.state.learning_rate = lr;
            timer.record(started.elapsed());

            let metrics =
                SegMetrics::evaluate(tower.outputs.binary_seg_logits.view(), batch.binary_labels().view());
            let summaries = self.parts.summaries.as_mut();
            record_batch(summaries, "train", &tower.outputs, &metrics, step)?;
            summaries.add_scalar("learning_rate", lr, step)?;

            if step % display_step == 0 {
                info!(
                    "Epoch: {} Step: {} total_loss= {:.6} binary_seg_loss= {:.6} instance_seg_loss= {:.6} \
                     l2_reg_loss= {:.6} accuracy= {:.6} fp= {:.6} fn= {:.6} lr= {:.6} mean_cost_time= {:.5}s",
                    step / steps_per_epoch + 1,
                    step + 1,
                    losses.total_loss,
                    losses.binary_seg_loss,
                    losses.discriminative_loss,
                    losses.l2_reg_loss,
                    metrics.accuracy,
                    metrics.false_positive,
                    metrics.false_negative,
                    lr,
                    timer.mean_secs(),
                );
                timer.reset();
            }

            if step % val_display_step == 0 {
                let pass = ValidationPass {
                    model: &self.parts.model,
                    params: &self.params,
                    batch_size: self.config.val_batch_size.get(),
                    num_batches: self.config.val_steps(),
                    intermediate_dir: self.intermediate_dir.as_deref(),
                };

                let outcome = pass.run(
                    self.parts.val_feeder.as_mut(),
                    self.parts.summaries.as_mut(),
                    step,
                )?;

                match outcome {
                    ValidationOutcome::Completed(report) => self.retain(&report)?,
                    ValidationOutcome::Diverged => return Ok(RunOutcome::Diverged { step }),
                }
            }
        }

        self.parts.summaries.flush()?;
        Ok(RunOutcome::Completed)
    }

    /// Hands a validation result to the retention policy, saving a checkpoint
    /// tagged with the accuracy if it's accepted.
    fn retain(&mut self, report: &ValidationReport) -> Result<()> {
        let accuracy = report.metrics.accuracy;

        if self.retention.consider(accuracy) {
            info!("MAX_ACC change to {accuracy}");
            let prefix = format!("tusimple_lanenet_{accuracy}");
            let path = self
                .parts
                .checkpoints
                .save(&self.params, &prefix, self.params.global_step())?;
            debug!(saved = self.retention.saved_count(); "kept {}", path.display());
        }

        self.state.best_validation_accuracy = self.retention.max_accuracy();
        self.state.checkpoints_saved_count = self.retention.saved_count();

        let losses = &report.losses;
        let metrics = &report.metrics;
        info!(
            "MEAN Val: total_loss= {:.6} binary_seg_loss= {:.6} instance_seg_loss= {:.6} \
             accuracy= {:.6} fp= {:.6} fn= {:.6} mean_cost_time= {:.5}s",
            losses.total_loss,
            losses.binary_seg_loss,
            losses.discriminative_loss,
            metrics.accuracy,
            metrics.false_positive,
            metrics.false_negative,
            report.elapsed.as_secs_f64(),
        );

        Ok(())
    }
}
