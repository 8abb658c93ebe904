use log::error;

use crate::model::LossTerms;

/// Checks a step's losses for NaN, logging every guarded value when one is found.
///
/// # Returns
/// Whether the run must stop.
pub fn losses_diverged(losses: &LossTerms) -> bool {
    if !losses.has_nan() {
        return false;
    }

    error!("cost is: {:.5}", losses.total_loss);
    error!("binary cost is: {:.5}", losses.binary_seg_loss);
    error!("instance cost is: {:.5}", losses.discriminative_loss);
    true
}
