use std::{fs, path::Path};

use ndarray::Axis;

use super::{binary_seg_image, denormalize_frame, embedding_image, jsonl::save_png};
use crate::{data::Batch, error::Result, model::ModelOutputs};

/// Dumps the inputs and predictions of a batch as PNG files for inspection.
///
/// For every frame `i` (1-based) writes `<flag>_<i>_gt_image.png`,
/// `<flag>_<i>_gt_binary_label.png`, `<flag>_<i>_gt_instance_label.png`,
/// `<flag>_<i>_gt_binary_seg.png` and `<flag>_<i>_pix_embedding.png` to `dir`.
pub fn record_intermediate(dir: &Path, flag: &str, batch: &Batch, outputs: &ModelOutputs) -> Result<()> {
    fs::create_dir_all(dir)?;

    let binary_seg = binary_seg_image(outputs.binary_seg_logits.view());
    let embedding = embedding_image(outputs.instance_seg_logits.view());
    let binary_labels = batch.binary_labels().mapv(|v| v.saturating_mul(255));
    let instance_labels = batch.instance_labels();

    for i in 0..batch.len() {
        let name = |what: &str| dir.join(format!("{flag}_{}_{what}.png", i + 1));

        let frame = denormalize_frame(batch.images().index_axis(Axis(0), i));
        save_png(frame.view(), &name("gt_image"))?;

        let binary_label = binary_labels.index_axis(Axis(0), i).insert_axis(Axis(2));
        save_png(binary_label, &name("gt_binary_label"))?;

        let instance_label = instance_labels.index_axis(Axis(0), i).insert_axis(Axis(2));
        save_png(instance_label, &name("gt_instance_label"))?;

        save_png(binary_seg.index_axis(Axis(0), i), &name("gt_binary_seg"))?;
        save_png(embedding.index_axis(Axis(0), i), &name("pix_embedding"))?;
    }

    Ok(())
}
