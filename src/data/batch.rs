use ndarray::{Array2, Array3, Array4, ArrayView2, ArrayView3, Axis, stack};

use crate::error::{Result, TrainErr};

/// A single labelled frame.
///
/// `image` is `[height, width, channels]`, both labels are `[height, width]`.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: Array3<f32>,
    pub binary_label: Array2<u8>,
    pub instance_label: Array2<u8>,
}

impl Sample {
    /// Creates a new `Sample`, checking that the labels match the image's spatial dims.
    pub fn new(
        image: Array3<f32>,
        binary_label: Array2<u8>,
        instance_label: Array2<u8>,
    ) -> Result<Self> {
        let (h, w, _) = image.dim();

        check_shape("binary_label", binary_label.shape(), &[h, w])?;
        check_shape("instance_label", instance_label.shape(), &[h, w])?;

        Ok(Self {
            image,
            binary_label,
            instance_label,
        })
    }
}

/// A batch of frames in NHWC layout with their per-pixel labels.
///
/// The leading batch dimension and the spatial dims always match across the
/// three tensors.
#[derive(Debug, Clone)]
pub struct Batch {
    images: Array4<f32>,
    binary_labels: Array3<u8>,
    instance_labels: Array3<u8>,
}

impl Batch {
    /// Creates a new `Batch`.
    ///
    /// # Arguments
    /// * `images` - The input frames, `[n, height, width, channels]`.
    /// * `binary_labels` - The lane/background masks, `[n, height, width]`.
    /// * `instance_labels` - The lane instance ids, `[n, height, width]`.
    ///
    /// # Returns
    /// The batch, or a `ShapeMismatch` error if the dims don't line up.
    pub fn new(
        images: Array4<f32>,
        binary_labels: Array3<u8>,
        instance_labels: Array3<u8>,
    ) -> Result<Self> {
        let (n, h, w, _) = images.dim();

        check_shape("binary_labels", binary_labels.shape(), &[n, h, w])?;
        check_shape("instance_labels", instance_labels.shape(), &[n, h, w])?;

        Ok(Self {
            images,
            binary_labels,
            instance_labels,
        })
    }

    /// Stacks samples of equal shape into a batch.
    pub fn from_samples(samples: &[Sample]) -> Result<Self> {
        if samples.is_empty() {
            return Err(TrainErr::SizeMismatch {
                what: "batch samples",
                got: 0,
                expected: 1,
            });
        }

        let images: Vec<ArrayView3<f32>> = samples.iter().map(|s| s.image.view()).collect();
        let binary: Vec<ArrayView2<u8>> = samples.iter().map(|s| s.binary_label.view()).collect();
        let instance: Vec<ArrayView2<u8>> =
            samples.iter().map(|s| s.instance_label.view()).collect();

        let shape_err = |name: &str, i: usize| TrainErr::ShapeMismatch {
            name: format!("{name} of sample {i}"),
            got: samples[i].image.shape().to_vec(),
            expected: samples[0].image.shape().to_vec(),
        };

        for (i, sample) in samples.iter().enumerate() {
            if sample.image.shape() != samples[0].image.shape() {
                return Err(shape_err("image", i));
            }
        }

        let images = stack(Axis(0), &images).map_err(|_| shape_err("image", 0))?;
        let binary_labels = stack(Axis(0), &binary).map_err(|_| shape_err("binary_label", 0))?;
        let instance_labels =
            stack(Axis(0), &instance).map_err(|_| shape_err("instance_label", 0))?;

        Self::new(images, binary_labels, instance_labels)
    }

    pub fn images(&self) -> &Array4<f32> {
        &self.images
    }

    pub fn binary_labels(&self) -> &Array3<u8> {
        &self.binary_labels
    }

    pub fn instance_labels(&self) -> &Array3<u8> {
        &self.instance_labels
    }

    /// The amount of frames in the batch.
    pub fn len(&self) -> usize {
        self.images.len_of(Axis(0))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The amount of pixels per frame.
    pub fn pixels_per_image(&self) -> usize {
        let (_, h, w, _) = self.images.dim();
        h * w
    }
}

fn check_shape(name: &str, got: &[usize], expected: &[usize]) -> Result<()> {
    if got != expected {
        return Err(TrainErr::ShapeMismatch {
            name: name.to_string(),
            got: got.to_vec(),
            expected: expected.to_vec(),
        });
    }

    Ok(())
}
