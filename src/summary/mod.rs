mod intermediate;
mod jsonl;

pub use intermediate::record_intermediate;
pub use jsonl::JsonlSummaryWriter;

use ndarray::{Array2, Array3, Array4, ArrayView3, ArrayView4, Axis, s};

use crate::{error::Result, metrics};

/// Receives scalar and image summaries keyed by step.
pub trait SummarySink {
    fn add_scalar(&mut self, tag: &str, value: f32, step: u64) -> Result<()>;

    /// Records a batch of `[n, height, width, channels]` images with 1 or 3 channels.
    fn add_image(&mut self, tag: &str, images: ArrayView4<u8>, step: u64) -> Result<()>;

    fn add_text(&mut self, tag: &str, text: &str, step: u64) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// The predicted lane mask as a single channel image, lanes at 255.
pub fn binary_seg_image(logits: ArrayView4<f32>) -> Array4<u8> {
    metrics::predicted_lanes(logits)
        .mapv(|lane| if lane { 255 } else { 0 })
        .insert_axis(Axis(3))
}

/// The first (up to) three embedding channels of every frame, each min-max
/// scaled to [0, 255] on it's own.
pub fn embedding_image(embedding: ArrayView4<f32>) -> Array4<u8> {
    let dims = embedding.len_of(Axis(3));
    let channels = if dims >= 3 { 3 } else { 1 };

    let mut out = Array4::zeros((
        embedding.len_of(Axis(0)),
        embedding.len_of(Axis(1)),
        embedding.len_of(Axis(2)),
        channels,
    ));

    for (frame, mut target) in embedding.outer_iter().zip(out.outer_iter_mut()) {
        for c in 0..channels.min(dims) {
            let scaled = scale_channel(frame, c);
            target.slice_mut(s![.., .., c]).assign(&scaled);
        }
    }

    out
}

fn scale_channel(frame: ArrayView3<f32>, channel: usize) -> Array2<u8> {
    metrics::minmax_scale(&frame.slice(s![.., .., channel]))
}

/// Turns a frame scaled to [-1, 1] back into `[height, width, 3]` pixels.
pub fn denormalize_frame(frame: ArrayView3<f32>) -> Array3<u8> {
    frame.mapv(|v| ((v + 1.0) * 127.5).round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_image_marks_lanes() {
        let mut logits = Array4::zeros((1, 1, 2, 2));
        logits[[0, 0, 1, 1]] = 1.0;

        let image = binary_seg_image(logits.view());
        assert_eq!(image.shape(), [1, 1, 2, 1]);
        assert_eq!(image[[0, 0, 0, 0]], 0);
        assert_eq!(image[[0, 0, 1, 0]], 255);
    }

    #[test]
    fn embedding_image_keeps_three_channels() {
        let embedding = Array4::from_shape_fn((2, 2, 2, 4), |(n, y, x, c)| {
            (n + y * 2 + x + c) as f32
        });

        let image = embedding_image(embedding.view());
        assert_eq!(image.shape(), [2, 2, 2, 3]);
        assert_eq!(image[[0, 0, 0, 0]], 0);
        assert_eq!(image[[0, 1, 1, 0]], 255);

        let narrow = embedding_image(embedding.slice(s![.., .., .., ..2]));
        assert_eq!(narrow.shape(), [2, 2, 2, 1]);
    }

    #[test]
    fn frames_map_back_to_pixels() {
        let frame = Array3::from_shape_vec((1, 1, 3), vec![-1.0, 0.0, 1.0]).unwrap();
        assert_eq!(denormalize_frame(frame.view()).into_raw_vec_and_offset().0, [0, 128, 255]);
    }
}
