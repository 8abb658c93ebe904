use std::{
    collections::VecDeque,
    fs::{self, File, OpenOptions},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use image::{GrayImage, RgbImage};
use ndarray::{ArrayView3, ArrayView4};
use serde::Serialize;

use super::SummarySink;
use crate::error::{Result, TrainErr};

/// Image summaries only keep the first frames of a batch.
const MAX_IMAGES: usize = 3;

const IMAGES_DIR: &str = "images";

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum EventValue<'a> {
    Scalar { value: f32 },
    Image { path: String },
    Text { text: &'a str },
}

#[derive(Serialize)]
struct Event<'a> {
    wall_time: f64,
    step: u64,
    tag: &'a str,
    #[serde(flatten)]
    value: EventValue<'a>,
}

/// Writes summaries to `<dir>/events.jsonl`, one JSON object per line, and image
/// summaries as PNG files under `<dir>/images`.
///
/// Every `add_image` call gets it's own sequence number, so summaries recorded
/// under the same tag and step never overwrite each other. Only the newest
/// `max_image_files` PNGs written by this writer are kept on disk.
#[derive(Debug)]
pub struct JsonlSummaryWriter {
    dir: PathBuf,
    events: BufWriter<File>,
    image_seq: u64,
    image_files: VecDeque<PathBuf>,
    max_image_files: usize,
}

impl JsonlSummaryWriter {
    pub const EVENTS_FILE: &'static str = "events.jsonl";
    pub const DEFAULT_MAX_IMAGE_FILES: usize = 3000;

    /// Opens the event file of `dir` for appending, creating the directory if absent.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let images = dir.join(IMAGES_DIR);
        fs::create_dir_all(&images)?;

        // Continue numbering after a previous run's images.
        let image_seq = fs::read_dir(&images)?.count() as u64;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(Self::EVENTS_FILE))?;

        Ok(Self {
            dir,
            events: BufWriter::new(file),
            image_seq,
            image_files: VecDeque::new(),
            max_image_files: Self::DEFAULT_MAX_IMAGE_FILES,
        })
    }

    /// Sets how many of it's own PNGs the writer keeps before deleting the oldest.
    pub fn with_max_image_files(mut self, max_image_files: usize) -> Self {
        self.max_image_files = max_image_files.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn evict_images(&mut self) -> Result<()> {
        while self.image_files.len() > self.max_image_files {
            let Some(oldest) = self.image_files.pop_front() else {
                break;
            };

            match fs::remove_file(&oldest) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }

    fn write_event(&mut self, tag: &str, step: u64, value: EventValue<'_>) -> Result<()> {
        let event = Event {
            wall_time: Utc::now().timestamp_millis() as f64 / 1000.0,
            step,
            tag,
            value,
        };

        serde_json::to_writer(&mut self.events, &event)?;
        self.events.write_all(b"\n")?;
        Ok(())
    }
}

impl SummarySink for JsonlSummaryWriter {
    fn add_scalar(&mut self, tag: &str, value: f32, step: u64) -> Result<()> {
        self.write_event(tag, step, EventValue::Scalar { value })
    }

    fn add_image(&mut self, tag: &str, images: ArrayView4<u8>, step: u64) -> Result<()> {
        let stem = tag.replace('/', "_");
        let seq = self.image_seq;
        self.image_seq += 1;

        for (i, frame) in images.outer_iter().take(MAX_IMAGES).enumerate() {
            let file_name = format!("{stem}_{step}_{seq:06}_{i}.png");
            let file = self.dir.join(IMAGES_DIR).join(&file_name);
            save_png(frame, &file)?;
            self.image_files.push_back(file);

            let path = format!("{IMAGES_DIR}/{file_name}");
            self.write_event(&format!("{tag}/image/{i}"), step, EventValue::Image { path })?;
        }

        self.evict_images()
    }

    fn add_text(&mut self, tag: &str, text: &str, step: u64) -> Result<()> {
        self.write_event(tag, step, EventValue::Text { text })
    }

    fn flush(&mut self) -> Result<()> {
        self.events.flush()?;
        Ok(())
    }
}

impl Drop for JsonlSummaryWriter {
    fn drop(&mut self) {
        let _ = self.events.flush();
    }
}

/// Saves a `[height, width, channels]` frame with 1 or 3 channels as a PNG.
pub(super) fn save_png(frame: ArrayView3<u8>, path: &Path) -> Result<()> {
    let (h, w, c) = frame.dim();
    let pixels: Vec<u8> = frame.iter().copied().collect();
    let size_err = || TrainErr::SizeMismatch {
        what: "image channels",
        got: c,
        expected: 3,
    };

    let (w, h) = (
        u32::try_from(w).map_err(|_| size_err())?,
        u32::try_from(h).map_err(|_| size_err())?,
    );

    match c {
        1 => GrayImage::from_raw(w, h, pixels).ok_or_else(size_err)?.save(path)?,
        3 => RgbImage::from_raw(w, h, pixels).ok_or_else(size_err)?.save(path)?,
        _ => return Err(size_err()),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn events(dir: &Path) -> Vec<serde_json::Value> {
        fs::read_to_string(dir.join(JsonlSummaryWriter::EVENTS_FILE))
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn scalars_are_appended_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonlSummaryWriter::new(dir.path()).unwrap();

        writer.add_scalar("train_cost", 1.5, 0).unwrap();
        writer.add_scalar("train_cost", 1.25, 1).unwrap();
        writer.flush().unwrap();

        let events = events(dir.path());
        assert_eq!(events.len(), 2);
        assert_eq!(events[1]["kind"], "scalar");
        assert_eq!(events[1]["tag"], "train_cost");
        assert_eq!(events[1]["step"], 1);
        assert_eq!(events[1]["value"], 1.25);
    }

    #[test]
    fn images_keep_the_first_three_frames() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonlSummaryWriter::new(dir.path()).unwrap();

        let images = Array4::<u8>::zeros((5, 2, 2, 1));
        writer.add_image("val/binary_seg_ret", images.view(), 4).unwrap();
        writer.flush().unwrap();

        let events = events(dir.path());
        assert_eq!(events.len(), 3);
        assert_eq!(events[2]["path"], "images/val_binary_seg_ret_4_000000_2.png");
        assert!(dir.path().join("images/val_binary_seg_ret_4_000000_2.png").is_file());
        assert!(!dir.path().join("images/val_binary_seg_ret_4_000000_3.png").exists());
    }

    #[test]
    fn images_at_the_same_step_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonlSummaryWriter::new(dir.path()).unwrap();

        let dark = Array4::<u8>::from_elem((1, 2, 2, 1), 10);
        let bright = Array4::<u8>::from_elem((1, 2, 2, 1), 200);
        writer.add_image("val_binary_seg_ret", dark.view(), 1000).unwrap();
        writer.add_image("val_binary_seg_ret", bright.view(), 1000).unwrap();
        writer.flush().unwrap();

        let files = fs::read_dir(dir.path().join("images")).unwrap().count();
        assert_eq!(files, 2);

        let events = events(dir.path());
        assert_eq!(events.len(), 2);
        assert_ne!(events[0]["path"], events[1]["path"]);

        let pixel = |event: &serde_json::Value| {
            let path = dir.path().join(event["path"].as_str().unwrap());
            image::open(path).unwrap().to_luma8().get_pixel(0, 0)[0]
        };
        assert_eq!(pixel(&events[0]), 10);
        assert_eq!(pixel(&events[1]), 200);
    }

    #[test]
    fn oldest_images_are_evicted() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonlSummaryWriter::new(dir.path())
            .unwrap()
            .with_max_image_files(4);

        let images = Array4::<u8>::zeros((3, 2, 2, 1));
        writer.add_image("train_binary_seg_ret", images.view(), 0).unwrap();
        writer.add_image("train_binary_seg_ret", images.view(), 1).unwrap();

        let images_dir = dir.path().join("images");
        assert_eq!(fs::read_dir(&images_dir).unwrap().count(), 4);
        assert!(!images_dir.join("train_binary_seg_ret_0_000000_0.png").exists());
        assert!(!images_dir.join("train_binary_seg_ret_0_000000_1.png").exists());
        assert!(images_dir.join("train_binary_seg_ret_0_000000_2.png").is_file());
        assert!(images_dir.join("train_binary_seg_ret_1_000001_2.png").is_file());
    }

    #[test]
    fn reopening_continues_the_image_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let images = Array4::<u8>::zeros((1, 2, 2, 1));

        JsonlSummaryWriter::new(dir.path())
            .unwrap()
            .add_image("x", images.view(), 0)
            .unwrap();
        JsonlSummaryWriter::new(dir.path())
            .unwrap()
            .add_image("x", images.view(), 0)
            .unwrap();

        assert!(dir.path().join("images/x_0_000000_0.png").is_file());
        assert!(dir.path().join("images/x_0_000001_0.png").is_file());
    }

    #[test]
    fn unsupported_channel_counts_fail() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = JsonlSummaryWriter::new(dir.path()).unwrap();

        let images = Array4::<u8>::zeros((1, 2, 2, 2));
        assert!(writer.add_image("x", images.view(), 0).is_err());
    }
}
