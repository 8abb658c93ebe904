use ndarray::ArrayViewMutD;

use super::ParamGen;

/// Fills tensors with a single value, as used for biases and normalization
/// statistics.
#[derive(Debug, Clone, Copy)]
pub struct ConstParamGen(pub f32);

impl ParamGen for ConstParamGen {
    fn fill(&mut self, mut values: ArrayViewMutD<f32>) {
        values.fill(self.0);
    }
}
