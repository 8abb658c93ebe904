use std::{
    fs,
    path::{Path, PathBuf},
};

use image::imageops::{self, FilterType};
use log::{debug, info};
use ndarray::{Array2, Array3};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{Batch, DataFeeder, Sample, Split};
use crate::error::{Result, TrainErr};

/// One line of a TuSimple index file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct IndexEntry {
    image: PathBuf,
    binary_label: PathBuf,
    instance_label: PathBuf,
}

/// Reads a preprocessed TuSimple split from `<dataset_dir>/{train,val}.txt`.
///
/// Every index line holds the source image, binary label and instance label
/// paths separated by whitespace; relative paths resolve against the dataset
/// directory. Images are resized to the configured size and scaled to [-1, 1],
/// labels are resized nearest-neighbour and the binary label is mapped to {0, 1}.
/// The train split is reshuffled on every pass.
#[derive(Debug)]
pub struct TusimpleFeeder {
    split: Split,
    entries: Vec<IndexEntry>,
    order: Vec<usize>,
    cursor: usize,
    width: u32,
    height: u32,
    rng: StdRng,
}

impl TusimpleFeeder {
    /// Creates a new `TusimpleFeeder`.
    ///
    /// # Arguments
    /// * `dataset_dir` - The directory holding the index files.
    /// * `split` - The split to read.
    /// * `(width, height)` - The size frames are resized to.
    /// * `seed` - Seeds the shuffling of the train split.
    ///
    /// # Returns
    /// The feeder, or an error if the index file is missing, malformed or empty.
    pub fn open(
        dataset_dir: &Path,
        split: Split,
        (width, height): (u32, u32),
        seed: u64,
    ) -> Result<Self> {
        let index_path = dataset_dir.join(split.index_file());
        let contents = fs::read_to_string(&index_path).map_err(|e| {
            TrainErr::Dataset(format!("failed to read {}: {e}", index_path.display()))
        })?;

        let entries = parse_index(dataset_dir, &contents)?;
        if entries.is_empty() {
            return Err(TrainErr::Dataset(format!(
                "{} lists no samples",
                index_path.display()
            )));
        }

        info!("loaded {} {split} samples from {}", entries.len(), index_path.display());

        let mut feeder = Self {
            split,
            order: (0..entries.len()).collect(),
            entries,
            cursor: 0,
            width,
            height,
            rng: StdRng::seed_from_u64(seed),
        };
        feeder.start_pass();
        Ok(feeder)
    }

    fn start_pass(&mut self) {
        self.cursor = 0;

        if self.split == Split::Train {
            self.order.shuffle(&mut self.rng);
        }
    }

    fn load(&self, entry: &IndexEntry) -> Result<Sample> {
        let (w, h) = (self.width, self.height);

        let rgb = image::open(&entry.image)?.to_rgb8();
        let rgb = imageops::resize(&rgb, w, h, FilterType::Triangle);
        let pixels: Vec<f32> = rgb
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 127.5 - 1.0)
            .collect();

        let binary = image::open(&entry.binary_label)?.to_luma8();
        let binary = imageops::resize(&binary, w, h, FilterType::Nearest);
        let binary: Vec<u8> = binary.into_raw().into_iter().map(|v| u8::from(v > 0)).collect();

        let instance = image::open(&entry.instance_label)?.to_luma8();
        let instance = imageops::resize(&instance, w, h, FilterType::Nearest).into_raw();

        let (h, w) = (h as usize, w as usize);
        let size_err = |what: &'static str| TrainErr::SizeMismatch {
            what,
            got: 0,
            expected: h * w,
        };

        Sample::new(
            Array3::from_shape_vec((h, w, 3), pixels).map_err(|_| size_err("image pixels"))?,
            Array2::from_shape_vec((h, w), binary).map_err(|_| size_err("binary label"))?,
            Array2::from_shape_vec((h, w), instance).map_err(|_| size_err("instance label"))?,
        )
    }
}

impl DataFeeder for TusimpleFeeder {
    fn next_batch(&mut self, batch_size: usize) -> Result<Batch> {
        let mut samples = Vec::with_capacity(batch_size);

        while samples.len() < batch_size {
            if self.cursor == self.order.len() {
                debug!(split = self.split.as_str(); "starting a new pass");
                self.start_pass();
            }

            let entry = &self.entries[self.order[self.cursor]];
            samples.push(self.load(entry)?);
            self.cursor += 1;
        }

        Batch::from_samples(&samples)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

fn parse_index(dataset_dir: &Path, contents: &str) -> Result<Vec<IndexEntry>> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [image, binary_label, instance_label] = fields[..] else {
                return Err(TrainErr::Dataset(format!(
                    "index line {} should hold 3 paths, found {}",
                    i + 1,
                    fields.len()
                )));
            };

            Ok(IndexEntry {
                image: dataset_dir.join(image),
                binary_label: dataset_dir.join(binary_label),
                instance_label: dataset_dir.join(instance_label),
            })
        })
        .collect()
}
