#![allow(dead_code)]

use std::{
    num::NonZeroUsize,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use lanenet_trainer::{
    Result, TrainErr,
    config::TrainConfig,
    data::{Batch, InMemoryFeeder, Sample},
    initialization::InitSpec,
    model::{LaneNet, LossTerms, ModelOutputs, NormUpdate, Phase, TowerOutput},
    params::{ParamSet, ParamSpec},
    summary::SummarySink,
};
use ndarray::{Array2, Array3, Array4, ArrayD, ArrayView4, IxDyn};

pub const SIDE: usize = 10;
pub const WEIGHT: &str = "w";
pub const STAT: &str = "norm/moving_mean";

/// A network whose behaviour is scripted per call.
///
/// * The single weight's gradient is the mean pixel value of the batch.
/// * The normalization statistic is set to that same mean.
/// * Training losses are `1.0` unless the call index is listed in `nan_calls`.
/// * Evaluation predicts lane for the first `accuracy * SIDE * SIDE` pixels,
///   reading the accuracy of the n-th evaluation from `val_accuracies`.
#[derive(Debug, Default)]
pub struct ScriptedNet {
    pub nan_calls: Vec<usize>,
    pub val_nan_calls: Vec<usize>,
    pub val_accuracies: Vec<f32>,
    pub train_calls: AtomicUsize,
    pub eval_calls: AtomicUsize,
}

impl ScriptedNet {
    pub fn with_val_accuracies(accuracies: &[f32]) -> Self {
        Self {
            val_accuracies: accuracies.to_vec(),
            ..Self::default()
        }
    }

    fn losses(nan: bool) -> LossTerms {
        let value = if nan { f32::NAN } else { 1.0 };
        LossTerms {
            total_loss: value,
            binary_seg_loss: value,
            discriminative_loss: value,
            l2_reg_loss: 0.0,
        }
    }

    /// Logits predicting lane for the first `accuracy` share of each frame.
    fn logits(batch: &Batch, accuracy: f32) -> Array4<f32> {
        let n = batch.len();
        let lanes = (accuracy * (SIDE * SIDE) as f32).round() as usize;

        Array4::from_shape_fn((n, SIDE, SIDE, 2), |(_, y, x, c)| {
            let is_lane = y * SIDE + x < lanes;
            match (c, is_lane) {
                (1, true) | (0, false) => 1.0,
                _ => 0.0,
            }
        })
    }

    fn outputs(batch: &Batch, losses: LossTerms, accuracy: f32) -> ModelOutputs {
        ModelOutputs {
            losses,
            binary_seg_logits: Self::logits(batch, accuracy),
            instance_seg_logits: Array4::zeros((batch.len(), SIDE, SIDE, 4)),
        }
    }
}

impl LaneNet for ScriptedNet {
    fn param_specs(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::trainable(WEIGHT, vec![1], InitSpec::Const { value: 0.0 }),
            ParamSpec::moving_stat(STAT, vec![1], 0.0),
        ]
    }

    fn compute_loss(&self, params: &ParamSet, batch: &Batch, _phase: Phase) -> Result<ModelOutputs> {
        params.by_name(WEIGHT)?;

        let call = self.eval_calls.fetch_add(1, Ordering::SeqCst);
        let accuracy = self
            .val_accuracies
            .get(call)
            .or(self.val_accuracies.last())
            .copied()
            .unwrap_or(0.0);

        let losses = Self::losses(self.val_nan_calls.contains(&call));
        Ok(Self::outputs(batch, losses, accuracy))
    }

    fn compute_gradients(&self, params: &ParamSet, batch: &Batch) -> Result<TowerOutput> {
        let weight = params.id(WEIGHT).ok_or(TrainErr::UnknownParam(WEIGHT.into()))?;
        let stat = params.id(STAT).ok_or(TrainErr::UnknownParam(STAT.into()))?;

        let call = self.train_calls.fetch_add(1, Ordering::SeqCst);
        let mean = batch.images().mean().unwrap_or(0.0);
        let value = || ArrayD::from_elem(IxDyn(&[1]), mean);

        Ok(TowerOutput {
            outputs: Self::outputs(batch, Self::losses(self.nan_calls.contains(&call)), 1.0),
            grads: vec![(weight, value())],
            norm_updates: vec![NormUpdate {
                param: stat,
                value: value(),
            }],
        })
    }
}

/// A lane-only frame whose pixels all hold `fill`.
pub fn sample(fill: f32) -> Sample {
    Sample::new(
        Array3::from_elem((SIDE, SIDE, 3), fill),
        Array2::ones((SIDE, SIDE)),
        Array2::ones((SIDE, SIDE)),
    )
    .unwrap()
}

pub fn feeder(fills: &[f32]) -> Box<InMemoryFeeder> {
    Box::new(InMemoryFeeder::new(fills.iter().map(|&fill| sample(fill)).collect()).unwrap())
}

/// A small configuration: one-sample batches and one validation batch per pass.
pub fn config(steps: usize) -> TrainConfig {
    let nz = |n: usize| NonZeroUsize::new(n).unwrap();

    let mut config = TrainConfig::default();
    config.train.steps = nz(steps);
    config.train.epochs = nz(steps);
    config.train.train_size = nz(2);
    config.train.val_size = nz(1);
    config.train.batch_size = nz(1);
    config.train.val_batch_size = nz(1);
    config.train.display_step = nz(1);
    config.train.val_display_step = nz(1);
    config.train.checkpoint_interval = nz(2);
    config.train.learning_rate = 0.1;
    config
}

#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Scalar { tag: String, value: f32, step: u64 },
    Image { tag: String, frames: usize, step: u64 },
    Text { tag: String, step: u64 },
}

/// A sink keeping every record in memory, shared with the test through `records`.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    pub records: Arc<Mutex<Vec<Record>>>,
}

impl RecordingSink {
    pub fn scalars(&self, tag: &str) -> Vec<(u64, f32)> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter_map(|record| match record {
                Record::Scalar { tag: t, value, step } if t == tag => Some((*step, *value)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, tag: &str) -> usize {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|record| match record {
                Record::Scalar { tag: t, .. }
                | Record::Image { tag: t, .. }
                | Record::Text { tag: t, .. } => t == tag,
            })
            .count()
    }
}

impl SummarySink for RecordingSink {
    fn add_scalar(&mut self, tag: &str, value: f32, step: u64) -> Result<()> {
        self.records.lock().unwrap().push(Record::Scalar {
            tag: tag.to_string(),
            value,
            step,
        });
        Ok(())
    }

    fn add_image(&mut self, tag: &str, images: ArrayView4<u8>, step: u64) -> Result<()> {
        self.records.lock().unwrap().push(Record::Image {
            tag: tag.to_string(),
            frames: images.len_of(ndarray::Axis(0)),
            step,
        });
        Ok(())
    }

    fn add_text(&mut self, tag: &str, _text: &str, step: u64) -> Result<()> {
        self.records.lock().unwrap().push(Record::Text {
            tag: tag.to_string(),
            step,
        });
        Ok(())
    }
}
