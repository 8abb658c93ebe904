use crate::{
    error::Result,
    metrics::SegMetrics,
    model::ModelOutputs,
    summary::{SummarySink, binary_seg_image, embedding_image},
};

/// Records the losses, metrics and visualizations of one batch under
/// `<prefix>_<name>` tags.
pub(crate) fn record_batch(
    sink: &mut dyn SummarySink,
    prefix: &str,
    outputs: &ModelOutputs,
    metrics: &SegMetrics,
    step: u64,
) -> Result<()> {
    let losses = &outputs.losses;
    let scalars = [
        ("cost", losses.total_loss),
        ("accuracy", metrics.accuracy),
        ("binary_seg_loss", losses.binary_seg_loss),
        ("instance_seg_loss", losses.discriminative_loss),
        ("fn", metrics.false_negative),
        ("fp", metrics.false_positive),
    ];

    for (name, value) in scalars {
        sink.add_scalar(&format!("{prefix}_{name}"), value, step)?;
    }

    let binary_seg = binary_seg_image(outputs.binary_seg_logits.view());
    sink.add_image(&format!("{prefix}_binary_seg_ret"), binary_seg.view(), step)?;

    let embedding = embedding_image(outputs.instance_seg_logits.view());
    sink.add_image(&format!("{prefix}_embedding_feats_ret"), embedding.view(), step)?;

    Ok(())
}
