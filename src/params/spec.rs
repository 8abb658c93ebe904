use serde::{Deserialize, Serialize};

use crate::initialization::InitSpec;

/// The role a tensor plays inside the `ParamSet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    /// Updated by the optimizer.
    Trainable,
    /// Normalization statistics, written only through norm updates.
    MovingStat,
    /// Optimizer accumulators such as momentum.
    OptimizerSlot,
    /// Exponential-moving-average copies of other parameters.
    Shadow,
}

impl ParamKind {
    /// Whether the moving-average tracker should keep a shadow of this kind.
    pub fn is_averaged(self) -> bool {
        matches!(self, ParamKind::Trainable | ParamKind::MovingStat)
    }
}

/// Declares a model parameter: it's name, shape, role and initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub kind: ParamKind,
    pub init: InitSpec,
}

impl ParamSpec {
    /// Creates a trainable parameter spec.
    pub fn trainable(name: impl Into<String>, shape: Vec<usize>, init: InitSpec) -> Self {
        Self {
            name: name.into(),
            shape,
            kind: ParamKind::Trainable,
            init,
        }
    }

    /// Creates a normalization statistic spec, initialized to a constant.
    pub fn moving_stat(name: impl Into<String>, shape: Vec<usize>, value: f32) -> Self {
        Self {
            name: name.into(),
            shape,
            kind: ParamKind::MovingStat,
            init: InitSpec::Const { value },
        }
    }

    /// The amount of scalars in the tensor.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
