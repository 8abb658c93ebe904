mod moving_average;
mod momentum;
mod optimizer;

pub use momentum::MomentumOptimizer;
pub use moving_average::ExponentialMovingAverage;
pub use optimizer::Optimizer;
