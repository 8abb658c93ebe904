use std::{
    path::Path,
    time::{Duration, Instant},
};

use log::debug;

use super::{guard::losses_diverged, summaries::record_batch};
use crate::{
    data::DataFeeder,
    error::Result,
    metrics::SegMetrics,
    model::{LaneNet, LossTerms, Phase},
    params::ParamSet,
    summary::{SummarySink, record_intermediate},
};

/// The means of a full validation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub losses: LossTerms,
    pub metrics: SegMetrics,
    pub batches: usize,
    pub elapsed: Duration,
}

/// How a validation pass ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Completed(ValidationReport),
    /// A batch produced a NaN loss, the run must stop.
    Diverged,
}

/// A read-only evaluation over a fixed amount of validation batches.
pub struct ValidationPass<'a, M: ?Sized> {
    pub model: &'a M,
    pub params: &'a ParamSet,
    pub batch_size: usize,
    pub num_batches: usize,
    /// Where the first batch's inputs and predictions are dumped, if anywhere.
    pub intermediate_dir: Option<&'a Path>,
}

impl<M: LaneNet + ?Sized> ValidationPass<'_, M> {
    /// Evaluates `num_batches` batches and averages their losses and metrics.
    ///
    /// # Arguments
    /// * `feeder` - The validation split.
    /// * `sink` - Where per-batch summaries are recorded.
    /// * `step` - The training step the summaries are tagged with.
    pub fn run(
        &self,
        feeder: &mut dyn DataFeeder,
        sink: &mut dyn SummarySink,
        step: u64,
    ) -> Result<ValidationOutcome> {
        let started = Instant::now();
        let mut losses = LossTerms::default();
        let mut metrics = SegMetrics::default();

        for val_step in 0..self.num_batches {
            let batch = feeder.next_batch(self.batch_size)?;
            let outputs = self.model.compute_loss(self.params, &batch, Phase::Eval)?;

            if losses_diverged(&outputs.losses) {
                return Ok(ValidationOutcome::Diverged);
            }

            if let Some(dir) = self.intermediate_dir.filter(|_| val_step == 0) {
                record_intermediate(dir, "val", &batch, &outputs)?;
            }

            let batch_metrics =
                SegMetrics::evaluate(outputs.binary_seg_logits.view(), batch.binary_labels().view());
            record_batch(sink, "val", &outputs, &batch_metrics, step)?;

            debug!(
                val_step = val_step,
                total_loss = outputs.losses.total_loss,
                accuracy = batch_metrics.accuracy;
                "validation batch"
            );

            losses.accumulate(&outputs.losses);
            metrics.accumulate(&batch_metrics);
        }

        Ok(ValidationOutcome::Completed(ValidationReport {
            losses: losses.mean(self.num_batches),
            metrics: metrics.mean(self.num_batches),
            batches: self.num_batches,
            elapsed: started.elapsed(),
        }))
    }
}
