//! Pixel-level segmentation metrics and visualization helpers.
//!
//! A pixel is predicted as lane when the lane logit is strictly greater than the
//! background logit, and counts as lane in the label when it's non zero. Every
//! rate whose denominator is empty is reported as `0.0`.

use ndarray::{Array, Array3, ArrayBase, ArrayView3, ArrayView4, Axis, Data, Dimension, Zip};

/// Precision / false-positive / false-negative rates of a binary segmentation.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SegMetrics {
    /// Fraction of labelled lane pixels predicted as lane.
    pub accuracy: f32,
    /// Fraction of predicted lane pixels labelled as background.
    pub false_positive: f32,
    /// Fraction of labelled lane pixels predicted as background.
    pub false_negative: f32,
}

impl SegMetrics {
    /// Evaluates binary segmentation logits against their labels.
    ///
    /// # Arguments
    /// * `logits` - The binary head output, `[n, height, width, 2]`.
    /// * `labels` - The binary labels, `[n, height, width]`.
    ///
    /// # Returns
    /// The three rates, computed in a single pass.
    pub fn evaluate(logits: ArrayView4<f32>, labels: ArrayView3<u8>) -> Self {
        let predicted = predicted_lanes(logits);

        let mut label_lanes = 0usize;
        let mut hits = 0usize;
        let mut predicted_lanes = 0usize;
        let mut false_positives = 0usize;

        Zip::from(&predicted).and(labels).for_each(|&pred, &label| {
            let is_lane = label != 0;

            label_lanes += usize::from(is_lane);
            hits += usize::from(is_lane && pred);
            predicted_lanes += usize::from(pred);
            false_positives += usize::from(pred && !is_lane);
        });

        Self {
            accuracy: ratio(hits, label_lanes),
            false_positive: ratio(false_positives, predicted_lanes),
            false_negative: ratio(label_lanes - hits, label_lanes),
        }
    }

    /// Adds another evaluation into this one, rate by rate.
    pub fn accumulate(&mut self, other: &SegMetrics) {
        self.accuracy += other.accuracy;
        self.false_positive += other.false_positive;
        self.false_negative += other.false_negative;
    }

    /// Divides every rate by `count`.
    pub fn mean(&self, count: usize) -> SegMetrics {
        let n = count.max(1) as f32;

        SegMetrics {
            accuracy: self.accuracy / n,
            false_positive: self.false_positive / n,
            false_negative: self.false_negative / n,
        }
    }
}

/// Returns the `[n, height, width]` mask of pixels predicted as lane.
pub fn predicted_lanes(logits: ArrayView4<f32>) -> Array3<bool> {
    logits.map_axis(Axis(3), |pixel| pixel.len() > 1 && pixel[1] > pixel[0])
}

/// Linearly rescales `x` so that it's minimum maps to 0 and it's maximum to 255.
///
/// A constant tensor maps to all zeros.
pub fn minmax_scale<S, D>(x: &ArrayBase<S, D>) -> Array<u8, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    let (min, max) = x
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    let range = max - min;
    if !range.is_finite() || range <= 0.0 {
        return Array::zeros(x.raw_dim());
    }

    x.mapv(|v| ((v - min) * 255.0 / range).round().clamp(0.0, 255.0) as u8)
}

fn ratio(num: usize, den: usize) -> f32 {
    if den == 0 {
        return 0.0;
    }

    num as f32 / den as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array3, Array4, arr1};

    /// One frame of four pixels: predictions [lane, lane, bg, bg].
    fn logits() -> Array4<f32> {
        let mut logits = Array4::zeros((1, 1, 4, 2));
        logits[[0, 0, 0, 1]] = 1.0;
        logits[[0, 0, 1, 1]] = 1.0;
        logits[[0, 0, 2, 0]] = 1.0;
        logits[[0, 0, 3, 0]] = 1.0;
        logits
    }

    #[test]
    fn rates_follow_their_denominators() {
        // labels [lane, bg, lane, bg]
        let labels = Array3::from_shape_vec((1, 1, 4), vec![1, 0, 1, 0]).unwrap();
        let metrics = SegMetrics::evaluate(logits().view(), labels.view());

        assert_eq!(metrics.accuracy, 0.5);
        assert_eq!(metrics.false_positive, 0.5);
        assert_eq!(metrics.false_negative, 0.5);
    }

    #[test]
    fn empty_denominators_yield_zero() {
        let labels = Array3::zeros((1, 1, 4));
        let metrics = SegMetrics::evaluate(logits().view(), labels.view());

        assert_eq!(metrics.accuracy, 0.0);
        assert_eq!(metrics.false_negative, 0.0);
        assert_eq!(metrics.false_positive, 1.0);
    }

    #[test]
    fn mean_divides_accumulated_rates() {
        let mut sum = SegMetrics::default();
        sum.accumulate(&SegMetrics {
            accuracy: 1.0,
            false_positive: 0.5,
            false_negative: 0.0,
        });
        sum.accumulate(&SegMetrics {
            accuracy: 0.5,
            false_positive: 0.0,
            false_negative: 0.5,
        });

        let mean = sum.mean(2);
        assert_eq!(mean.accuracy, 0.75);
        assert_eq!(mean.false_positive, 0.25);
        assert_eq!(mean.false_negative, 0.25);
    }

    #[test]
    fn minmax_spans_full_range() {
        let x = arr1(&[-1.0, 0.0, 1.0]).into_dyn();
        assert_eq!(minmax_scale(&x), arr1(&[0u8, 128, 255]).into_dyn());

        let flat = arr1(&[3.0, 3.0]).into_dyn();
        assert_eq!(minmax_scale(&flat), arr1(&[0u8, 0]).into_dyn());
    }
}
