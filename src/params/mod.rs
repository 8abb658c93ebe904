mod param_set;
mod spec;

pub use param_set::{Param, ParamId, ParamSet};
pub use spec::{ParamKind, ParamSpec};
