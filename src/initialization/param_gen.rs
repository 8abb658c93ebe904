use ndarray::ArrayViewMutD;

/// Fills parameter tensors with their initial values.
pub trait ParamGen {
    /// Overwrites every element of `values`, in logical order.
    fn fill(&mut self, values: ArrayViewMutD<f32>);
}
