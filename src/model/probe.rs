use ndarray::{Array1, Array2, ArrayD, ArrayView, ArrayView1, ArrayView2, Axis, Dimension, s};

use super::{
    DiscriminativeLoss, LaneNet, LossTerms, ModelOutputs, NetFlag, NormUpdate, Phase, TowerOutput,
};
use crate::{
    data::Batch,
    error::{Result, TrainErr},
    initialization::InitSpec,
    params::{ParamId, ParamSet, ParamSpec},
};

const CHANNELS: usize = 3;
const CLASSES: usize = 2;

const MOVING_MEAN: &str = "input_norm/moving_mean";
const MOVING_VARIANCE: &str = "input_norm/moving_variance";
const TRUNK: &str = "trunk";
const BINARY_HEAD: &str = "binary_head";
const INSTANCE_HEAD: &str = "instance_head";

/// A per-pixel baseline for the lane network.
///
/// Every pixel goes through a normalized input, a shared ReLU trunk and two
/// linear heads: a background/lane softmax classifier and an embedding trained
/// with the discriminative loss. Pixels don't see their neighbours, so this only
/// learns color cues; it exists to exercise the training loop end to end.
#[derive(Debug, Clone)]
pub struct LinearProbe {
    width: usize,
    embedding_dims: usize,
    norm_decay: f32,
    epsilon: f32,
    weight_decay: f32,
    discriminative: DiscriminativeLoss,
}

impl LinearProbe {
    /// Creates a new `LinearProbe`.
    ///
    /// # Arguments
    /// * `net_flag` - Selects the trunk width: 16 for `vgg`, 8 for `mobilenet_v2`.
    /// * `embedding_dims` - The size of the pixel embedding.
    ///
    /// # Returns
    /// A new `LinearProbe` instance.
    pub fn new(net_flag: NetFlag, embedding_dims: usize) -> Self {
        let width = match net_flag {
            NetFlag::Vgg => 16,
            NetFlag::MobilenetV2 => 8,
        };

        Self {
            width,
            embedding_dims,
            norm_decay: 0.99,
            epsilon: 1e-3,
            weight_decay: 0.001,
            discriminative: DiscriminativeLoss::default(),
        }
    }

    /// Overrides the trunk width.
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn width(&self) -> usize {
        self.width
    }

    fn dense<'a>(&self, params: &'a ParamSet, name: &str, dims: (usize, usize)) -> Result<Dense<'a>> {
        let weights = lookup(params, &format!("{name}/weights"), &[dims.0, dims.1])?;
        let biases = lookup(params, &format!("{name}/biases"), &[dims.1])?;
        Ok(Dense { weights, biases })
    }

    fn layers<'a>(&self, params: &'a ParamSet) -> Result<Layers<'a>> {
        Ok(Layers {
            moving_mean: lookup(params, MOVING_MEAN, &[CHANNELS])?,
            moving_variance: lookup(params, MOVING_VARIANCE, &[CHANNELS])?,
            trunk: self.dense(params, TRUNK, (CHANNELS, self.width))?,
            binary: self.dense(params, BINARY_HEAD, (self.width, CLASSES))?,
            instance: self.dense(params, INSTANCE_HEAD, (self.width, self.embedding_dims))?,
        })
    }

    fn forward<'a>(&self, params: &'a ParamSet, batch: &Batch, phase: Phase) -> Result<Forward<'a>> {
        let layers = self.layers(params)?;
        let (n, h, w, c) = batch.images().dim();

        if c != CHANNELS {
            return Err(TrainErr::SizeMismatch {
                what: "image channels",
                got: c,
                expected: CHANNELS,
            });
        }

        let pixels = n * h * w;
        if pixels == 0 {
            return Err(TrainErr::SizeMismatch {
                what: "batch pixels",
                got: 0,
                expected: 1,
            });
        }

        let x = Array2::from_shape_vec((pixels, c), batch.images().iter().copied().collect())
            .map_err(|_| TrainErr::SizeMismatch {
                what: "batch pixels",
                got: batch.images().len(),
                expected: pixels * c,
            })?;

        let batch_mean = x
            .mean_axis(Axis(0))
            .unwrap_or_else(|| Array1::zeros(CHANNELS));
        let batch_variance = x.var_axis(Axis(0), 0.0);

        let (mean, variance) = match phase {
            Phase::Train => (batch_mean.clone(), batch_variance.clone()),
            Phase::Eval => (
                layers.moving_mean.1.to_owned(),
                layers.moving_variance.1.to_owned(),
            ),
        };

        let inputs = (&x - &mean) / &variance.mapv(|v| (v + self.epsilon).sqrt());
        let hidden_pre = layers.trunk.forward(&inputs);
        let hidden = hidden_pre.mapv(|z| z.max(0.0));
        let logits = layers.binary.forward(&hidden);
        let embedding = layers.instance.forward(&hidden);

        let binary_labels: Vec<u8> = batch.binary_labels().iter().copied().collect();
        let (binary_seg_loss, d_logits) = softmax_cross_entropy(&logits, &binary_labels);

        let instance_labels: Array1<u8> = batch.instance_labels().iter().copied().collect();
        let per_frame = h * w;
        let mut discriminative_loss = 0.0;
        let mut d_embedding = Array2::zeros(embedding.raw_dim());

        for frame in 0..n {
            let rows = frame * per_frame..(frame + 1) * per_frame;
            let (loss, grad) = self.discriminative.loss_and_grad(
                embedding.slice(s![rows.clone(), ..]),
                instance_labels.slice(s![rows.clone()]),
            );

            discriminative_loss += loss / n as f32;
            d_embedding
                .slice_mut(s![rows, ..])
                .assign(&(grad / n as f32));
        }

        let l2_reg_loss = self.weight_decay * layers.l2();

        let losses = LossTerms {
            total_loss: binary_seg_loss + discriminative_loss + l2_reg_loss,
            binary_seg_loss,
            discriminative_loss,
            l2_reg_loss,
        };

        Ok(Forward {
            layers,
            shape: (n, h, w),
            losses,
            inputs,
            hidden_pre,
            hidden,
            logits,
            embedding,
            d_logits,
            d_embedding,
            batch_mean,
            batch_variance,
        })
    }
}

impl LaneNet for LinearProbe {
    fn param_specs(&self) -> Vec<ParamSpec> {
        let dense = |name: &str, fan_in: usize, fan_out: usize, init: InitSpec| {
            [
                ParamSpec::trainable(format!("{name}/weights"), vec![fan_in, fan_out], init),
                ParamSpec::trainable(
                    format!("{name}/biases"),
                    vec![fan_out],
                    InitSpec::Const { value: 0.0 },
                ),
            ]
        };

        let (w, d) = (self.width, self.embedding_dims);

        let mut specs = vec![
            ParamSpec::moving_stat(MOVING_MEAN, vec![CHANNELS], 0.0),
            ParamSpec::moving_stat(MOVING_VARIANCE, vec![CHANNELS], 1.0),
        ];
        specs.extend(dense(TRUNK, CHANNELS, w, InitSpec::Kaiming { fan_in: CHANNELS }));
        specs.extend(dense(
            BINARY_HEAD,
            w,
            CLASSES,
            InitSpec::XavierUniform {
                fan_in: w,
                fan_out: CLASSES,
            },
        ));
        specs.extend(dense(
            INSTANCE_HEAD,
            w,
            d,
            InitSpec::XavierUniform {
                fan_in: w,
                fan_out: d,
            },
        ));
        specs
    }

    fn compute_loss(&self, params: &ParamSet, batch: &Batch, phase: Phase) -> Result<ModelOutputs> {
        self.forward(params, batch, phase)?.into_outputs()
    }

    fn compute_gradients(&self, params: &ParamSet, batch: &Batch) -> Result<TowerOutput> {
        let fwd = self.forward(params, batch, Phase::Train)?;
        let layers = &fwd.layers;

        let (binary_grads, d_hidden_binary) = layers.binary.backward(&fwd.hidden, &fwd.d_logits);
        let (instance_grads, d_hidden_instance) =
            layers.instance.backward(&fwd.hidden, &fwd.d_embedding);

        let mut d_hidden = d_hidden_binary + &d_hidden_instance;
        d_hidden.zip_mut_with(&fwd.hidden_pre, |d, &z| {
            if z <= 0.0 {
                *d = 0.0;
            }
        });

        let (trunk_grads, _) = layers.trunk.backward(&fwd.inputs, &d_hidden);

        let wd = self.weight_decay;
        let grads = [&layers.trunk, &layers.binary, &layers.instance]
            .into_iter()
            .zip([trunk_grads, binary_grads, instance_grads])
            .flat_map(|(dense, grads)| dense.with_decay(grads, wd))
            .collect();

        let decay = self.norm_decay;
        let moving = |(id, current): &(ParamId, ArrayView1<f32>), batch: &Array1<f32>| NormUpdate {
            param: *id,
            value: (&(current * decay) + &(batch * (1.0 - decay))).into_dyn(),
        };

        let norm_updates = vec![
            moving(&layers.moving_mean, &fwd.batch_mean),
            moving(&layers.moving_variance, &fwd.batch_variance),
        ];

        Ok(TowerOutput {
            outputs: fwd.into_outputs()?,
            grads,
            norm_updates,
        })
    }
}

/// A linear layer `y = x w + b` borrowed from a `ParamSet`.
struct Dense<'a> {
    weights: (ParamId, ArrayView2<'a, f32>),
    biases: (ParamId, ArrayView1<'a, f32>),
}

impl Dense<'_> {
    fn forward(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weights.1) + &self.biases.1
    }

    /// Returns the weight and bias gradients and the gradient w.r.t. the input.
    fn backward(&self, x: &Array2<f32>, d: &Array2<f32>) -> ([ArrayD<f32>; 2], Array2<f32>) {
        let dw = x.t().dot(d);
        let db = d.sum_axis(Axis(0));
        let dx = d.dot(&self.weights.1.t());
        ([dw.into_dyn(), db.into_dyn()], dx)
    }

    /// Pairs the gradients with their ids, adding the L2 weight decay term.
    fn with_decay(&self, [dw, db]: [ArrayD<f32>; 2], wd: f32) -> [(ParamId, ArrayD<f32>); 2] {
        let (w_id, w) = &self.weights;
        let (b_id, b) = &self.biases;

        [
            (*w_id, dw + &(w * wd).into_dyn()),
            (*b_id, db + &(b * wd).into_dyn()),
        ]
    }

    /// `sum(w^2) / 2` over both tensors.
    fn l2(&self) -> f32 {
        let sq = |v: &f32| v * v;
        (self.weights.1.iter().map(sq).sum::<f32>() + self.biases.1.iter().map(sq).sum::<f32>()) / 2.0
    }
}

struct Layers<'a> {
    moving_mean: (ParamId, ArrayView1<'a, f32>),
    moving_variance: (ParamId, ArrayView1<'a, f32>),
    trunk: Dense<'a>,
    binary: Dense<'a>,
    instance: Dense<'a>,
}

impl Layers<'_> {
    fn l2(&self) -> f32 {
        self.trunk.l2() + self.binary.l2() + self.instance.l2()
    }
}

/// Intermediate values of a training or evaluation forward pass.
struct Forward<'a> {
    layers: Layers<'a>,
    shape: (usize, usize, usize),
    losses: LossTerms,
    /// `[pixels, channels]`, normalized.
    inputs: Array2<f32>,
    hidden_pre: Array2<f32>,
    hidden: Array2<f32>,
    logits: Array2<f32>,
    embedding: Array2<f32>,
    d_logits: Array2<f32>,
    d_embedding: Array2<f32>,
    batch_mean: Array1<f32>,
    batch_variance: Array1<f32>,
}

impl Forward<'_> {
    fn into_outputs(self) -> Result<ModelOutputs> {
        let (n, h, w) = self.shape;
        let dims = self.embedding.ncols();

        let binary_seg_logits = self
            .logits
            .into_shape_with_order((n, h, w, CLASSES))
            .map_err(|_| TrainErr::SizeMismatch {
                what: "binary logits",
                got: 0,
                expected: n * h * w * CLASSES,
            })?;

        let instance_seg_logits = self
            .embedding
            .into_shape_with_order((n, h, w, dims))
            .map_err(|_| TrainErr::SizeMismatch {
                what: "instance logits",
                got: 0,
                expected: n * h * w * dims,
            })?;

        Ok(ModelOutputs {
            losses: self.losses,
            binary_seg_logits,
            instance_seg_logits,
        })
    }
}

/// Mean softmax cross-entropy over rows and it's gradient w.r.t. the logits.
fn softmax_cross_entropy(logits: &Array2<f32>, labels: &[u8]) -> (f32, Array2<f32>) {
    let rows = logits.nrows().max(1) as f32;
    let mut grad = Array2::zeros(logits.raw_dim());
    let mut loss = 0.0;

    for ((row, mut g), &label) in logits.rows().into_iter().zip(grad.rows_mut()).zip(labels) {
        let class = usize::from(label != 0);
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        let exps = row.mapv(|v| (v - max).exp());
        let sum = exps.sum();

        loss += max + sum.ln() - row[class];

        g.assign(&(exps / sum));
        g[class] -= 1.0;
        g /= rows;
    }

    (loss / rows, grad)
}

fn lookup<'a, D>(params: &'a ParamSet, name: &str, shape: &[usize]) -> Result<(ParamId, ArrayView<'a, f32, D>)>
where
    D: Dimension,
{
    let id = params
        .id(name)
        .ok_or_else(|| TrainErr::UnknownParam(name.to_string()))?;
    let value = params.get(id);

    let mismatch = || TrainErr::ShapeMismatch {
        name: name.to_string(),
        got: value.shape().to_vec(),
        expected: shape.to_vec(),
    };

    if value.shape() != shape {
        return Err(mismatch());
    }

    let view = value.view().into_dimensionality::<D>().map_err(|_| mismatch())?;
    Ok((id, view))
}
