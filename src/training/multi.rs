use std::time::Instant;

use chrono::Local;
use log::{debug, error, info};
use rand::{SeedableRng, rngs::StdRng};
use rayon::prelude::*;

use super::{
    InitPolicy, IntervalTimer, PolynomialDecay, RunOutcome, TrainerParts, TrainingState,
    towers::{TowerGrads, apply_norm_updates, average_gradients},
};
use crate::{
    config::{TrainConfig, TrainSection},
    data::Batch,
    error::{Result, TrainErr},
    model::{LaneNet, LossTerms, Phase, TowerOutput},
    optimization::{ExponentialMovingAverage, MomentumOptimizer, Optimizer},
    params::ParamSet,
};

/// Trains one replica per device on it's own batch, averaging their gradients
/// into a single update per epoch.
///
/// Every replica reads the same parameters. Tower 0 runs first on the calling
/// thread and is the only one whose normalization statistics and summaries are
/// kept; the rest run on the rayon pool.
pub struct MultiDeviceTrainer<M> {
    config: TrainSection,
    parts: TrainerParts<M>,
    num_towers: usize,
    params: ParamSet,
    optimizer: MomentumOptimizer,
    moving_average: ExponentialMovingAverage,
    schedule: PolynomialDecay,
    state: TrainingState,
    model_name: String,
}

impl<M: LaneNet> MultiDeviceTrainer<M> {
    /// Creates a new `MultiDeviceTrainer`.
    ///
    /// # Arguments
    /// * `config` - The training configuration.
    /// * `parts` - The model, feeders and sinks to drive.
    /// * `init` - Where the initial parameters come from.
    /// * `model_name` - The checkpoint prefix, see `timestamped_model_name`.
    /// * `num_towers` - How many replicas to train, one per device.
    ///
    /// # Returns
    /// The ready trainer, `NoDevices` if `num_towers` is zero, or an error if the
    /// parameters can't be built or the prior weights don't exist.
    pub fn new(
        config: &TrainConfig,
        parts: TrainerParts<M>,
        init: &InitPolicy,
        model_name: String,
        num_towers: usize,
    ) -> Result<Self> {
        if num_towers == 0 {
            return Err(TrainErr::NoDevices);
        }

        let config = config.train.clone();

        let specs = parts.model.param_specs();
        let mut params = ParamSet::initialize(&specs, StdRng::seed_from_u64(config.seed))?;
        let optimizer = MomentumOptimizer::new(&mut params, config.momentum)?;
        let moving_average = ExponentialMovingAverage::new(&mut params, config.moving_average_decay)?;
        init.apply(&mut params, parts.checkpoints.as_ref())?;

        let schedule = PolynomialDecay::multi_device(config.learning_rate, config.epochs.get());

        Ok(Self {
            config,
            parts,
            num_towers,
            params,
            optimizer,
            moving_average,
            schedule,
            state: TrainingState::default(),
            model_name,
        })
    }

    pub fn params(&self) -> &ParamSet {
        &self.params
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn num_towers(&self) -> usize {
        self.num_towers
    }

    /// Runs every configured epoch: one combined training step followed by a
    /// single validation batch per tower.
    ///
    /// # Returns
    /// `Completed`, or `Diverged` as soon as the averaged training loss turns NaN.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let epochs = self.config.epochs.get() as u64;
        let display_step = self.config.display_step.get() as u64;
        let val_display_step = self.config.val_display_step.get() as u64;
        let checkpoint_interval = self.config.checkpoint_interval.get() as u64;
        let mut train_timer = IntervalTimer::default();
        let mut val_timer = IntervalTimer::default();

        for epoch in 0..epochs {
            self.state.current_step = epoch;

            let started = Instant::now();
            let batch_size = self.config.batch_size.get();
            let batches = self.next_batches(batch_size, false)?;
            let (first, rest) = self.compute_towers(&batches)?;

            let train_loss = mean_total_loss(
                std::iter::once(&first.outputs.losses).chain(rest.iter().map(|t| &t.outputs.losses)),
            );

            if train_loss.is_nan() {
                error!("Train loss is nan");
                return Ok(RunOutcome::Diverged { step: epoch });
            }

            let tower_0 = first.outputs.losses;
            let lr = self.apply(first, rest)?;
            train_timer.record(started.elapsed());

            let summaries = self.parts.summaries.as_mut();
            summaries.add_scalar("average_train_loss", train_loss, epoch)?;
            summaries.add_scalar("learning_rate", lr, epoch)?;
            summaries.add_scalar("tower_0/total_loss", tower_0.total_loss, epoch)?;
            summaries.add_scalar("tower_0/binary_seg_loss", tower_0.binary_seg_loss, epoch)?;
            summaries.add_scalar("tower_0/instance_seg_loss", tower_0.discriminative_loss, epoch)?;
            summaries.add_scalar("tower_0/l2_reg_loss", tower_0.l2_reg_loss, epoch)?;

            let started_val = Instant::now();
            let val_loss = self.validate()?;
            self.parts
                .summaries
                .add_scalar("average_val_loss", val_loss, epoch)?;
            val_timer.record(started_val.elapsed());

            if epoch % display_step == 0 {
                info!(
                    "Epoch_Train: {} total_loss= {:.6} lr= {:.6} mean_cost_time= {:.5}s",
                    epoch + 1,
                    train_loss,
                    lr,
                    train_timer.mean_secs(),
                );
                train_timer.reset();
            }

            if epoch % val_display_step == 0 {
                info!(
                    "Epoch_Val: {} total_loss= {:.6} mean_cost_time= {:.5}s",
                    epoch + 1,
                    val_loss,
                    val_timer.mean_secs(),
                );
                val_timer.reset();
            }

            if epoch % checkpoint_interval == 0 {
                self.parts
                    .checkpoints
                    .save(&self.params, &self.model_name, epoch)?;
            }
        }

        self.parts.summaries.flush()?;
        Ok(RunOutcome::Completed)
    }

    /// Pulls one batch per tower from the training or validation split.
    fn next_batches(&mut self, batch_size: usize, val: bool) -> Result<Vec<Batch>> {
        let feeder = if val {
            self.parts.val_feeder.as_mut()
        } else {
            self.parts.train_feeder.as_mut()
        };

        (0..self.num_towers)
            .map(|_| feeder.next_batch(batch_size))
            .collect()
    }

    /// Runs the forward and backward pass of every tower, tower 0 first.
    fn compute_towers(&self, batches: &[Batch]) -> Result<(TowerOutput, Vec<TowerOutput>)> {
        let (first, rest) = batches.split_first().ok_or(TrainErr::NoDevices)?;
        let model = &self.parts.model;
        let params = &self.params;

        let tower_0 = model.compute_gradients(params, first)?;
        debug!(tower = 0, total_loss = tower_0.outputs.losses.total_loss; "tower finished");

        let others = rest
            .par_iter()
            .enumerate()
            .map(|(i, batch)| -> Result<TowerOutput> {
                let tower = model.compute_gradients(params, batch)?;
                debug!(tower = i + 1, total_loss = tower.outputs.losses.total_loss; "tower finished");
                Ok(tower)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok((tower_0, others))
    }

    /// Applies one combined update: tower 0's normalization statistics, the
    /// averaged gradients and the moving averages, in that order.
    ///
    /// # Returns
    /// The learning rate the gradients were applied with.
    fn apply(&mut self, first: TowerOutput, rest: Vec<TowerOutput>) -> Result<f32> {
        let towers: Vec<TowerGrads> = std::iter::once(first.grads)
            .chain(rest.into_iter().map(|tower| tower.grads))
            .collect();
        let grads = average_gradients(&towers)?;

        let num_updates = self.params.global_step();
        let lr = self.schedule.learning_rate(num_updates);

        apply_norm_updates(&mut self.params, first.norm_updates)?;
        self.optimizer.apply_gradients(&mut self.params, &grads, lr)?;
        self.params.increment_global_step();
        self.moving_average.apply(&mut self.params, num_updates);

        self.state.learning_rate = lr;
        Ok(lr)
    }

    /// Evaluates one validation batch per tower.
    ///
    /// # Returns
    /// The tower-averaged total loss.
    fn validate(&mut self) -> Result<f32> {
        let batches = self.next_batches(self.config.val_batch_size.get(), true)?;
        let model = &self.parts.model;
        let params = &self.params;

        let losses = batches
            .par_iter()
            .map(|batch| -> Result<LossTerms> {
                Ok(model.compute_loss(params, batch, Phase::Eval)?.losses)
            })
            .collect::<Result<Vec<LossTerms>>>()?;

        Ok(mean_total_loss(losses.iter()))
    }
}

/// The checkpoint prefix of a run of `net` started now:
/// `tusimple_lanenet_<net>_<%Y-%m-%d-%H-%M-%S>`.
pub fn timestamped_model_name(net: &str) -> String {
    let started = Local::now().format("%Y-%m-%d-%H-%M-%S");
    format!("tusimple_lanenet_{net}_{started}")
}

fn mean_total_loss<'a>(losses: impl Iterator<Item = &'a LossTerms>) -> f32 {
    let (sum, count) = losses.fold((0.0, 0usize), |(sum, count), terms| {
        (sum + terms.total_loss, count + 1)
    });
    sum / count.max(1) as f32
}
