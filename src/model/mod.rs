mod discriminative;
mod probe;

pub use discriminative::DiscriminativeLoss;
pub use probe::LinearProbe;

use clap::ValueEnum;
use ndarray::{Array4, ArrayD};
use serde::{Deserialize, Serialize};

use crate::{
    data::Batch,
    error::Result,
    params::{ParamId, ParamSet, ParamSpec},
};

/// The backbone the network is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetFlag {
    #[value(name = "vgg")]
    Vgg,
    #[value(name = "mobilenet_v2")]
    MobilenetV2,
}

impl NetFlag {
    pub fn as_str(self) -> &'static str {
        match self {
            NetFlag::Vgg => "vgg",
            NetFlag::MobilenetV2 => "mobilenet_v2",
        }
    }
}

/// Whether a forward pass trains or only evaluates.
///
/// Training passes normalize with the batch statistics, evaluation passes with
/// the moving ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Train,
    Eval,
}

/// The loss terms reported by a forward pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossTerms {
    pub total_loss: f32,
    pub binary_seg_loss: f32,
    pub discriminative_loss: f32,
    pub l2_reg_loss: f32,
}

impl LossTerms {
    /// Whether any of the guarded losses (total, segmentation, embedding) is NaN.
    pub fn has_nan(&self) -> bool {
        self.total_loss.is_nan() || self.binary_seg_loss.is_nan() || self.discriminative_loss.is_nan()
    }

    /// Adds another set of terms into this one.
    pub fn accumulate(&mut self, other: &LossTerms) {
        self.total_loss += other.total_loss;
        self.binary_seg_loss += other.binary_seg_loss;
        self.discriminative_loss += other.discriminative_loss;
        self.l2_reg_loss += other.l2_reg_loss;
    }

    /// Divides every term by `count`.
    pub fn mean(&self, count: usize) -> LossTerms {
        let n = count.max(1) as f32;

        LossTerms {
            total_loss: self.total_loss / n,
            binary_seg_loss: self.binary_seg_loss / n,
            discriminative_loss: self.discriminative_loss / n,
            l2_reg_loss: self.l2_reg_loss / n,
        }
    }
}

/// Everything a forward pass produces.
#[derive(Debug, Clone)]
pub struct ModelOutputs {
    pub losses: LossTerms,
    /// `[n, height, width, 2]`, background then lane.
    pub binary_seg_logits: Array4<f32>,
    /// `[n, height, width, embedding_dims]`.
    pub instance_seg_logits: Array4<f32>,
}

/// A new value for a normalization statistic, produced by a training pass.
#[derive(Debug, Clone)]
pub struct NormUpdate {
    pub param: ParamId,
    pub value: ArrayD<f32>,
}

/// The result of a forward and backward pass on one replica.
#[derive(Debug, Clone)]
pub struct TowerOutput {
    pub outputs: ModelOutputs,
    /// One gradient per trainable parameter, in a stable order.
    pub grads: Vec<(ParamId, ArrayD<f32>)>,
    pub norm_updates: Vec<NormUpdate>,
}

/// A two-headed lane segmentation network: a binary lane mask head and a pixel
/// embedding head used to tell lane instances apart.
///
/// Implementations only read the parameter set; every update goes through the
/// training orchestrator.
pub trait LaneNet: Sync {
    /// Declares every parameter the network reads.
    fn param_specs(&self) -> Vec<ParamSpec>;

    /// Runs a forward pass.
    ///
    /// # Arguments
    /// * `params` - The current parameters.
    /// * `batch` - The input batch.
    /// * `phase` - Whether the pass is part of training or evaluation.
    ///
    /// # Returns
    /// The loss terms and the output tensors of both heads.
    fn compute_loss(&self, params: &ParamSet, batch: &Batch, phase: Phase) -> Result<ModelOutputs>;

    /// Runs a training forward pass followed by a backward pass.
    ///
    /// # Arguments
    /// * `params` - The current parameters.
    /// * `batch` - The input batch.
    ///
    /// # Returns
    /// The forward outputs, a gradient per trainable parameter and the new
    /// normalization statistics.
    fn compute_gradients(&self, params: &ParamSet, batch: &Batch) -> Result<TowerOutput>;
}
