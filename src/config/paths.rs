use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{error::Result, model::NetFlag};

/// The output directories of a training run.
///
/// Checkpoints go under `<root>/model/<run>`, summaries under `<root>/tboard/<run>`
/// and intermediate dumps under `<root>/tmp`, where `<run>` is
/// `tusimple_lanenet_<net_flag>_<version_flag>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPaths {
    pub model_dir: PathBuf,
    pub tboard_dir: PathBuf,
    pub tmp_dir: PathBuf,
}

impl RunPaths {
    pub fn new(root: &Path, net_flag: NetFlag, version_flag: &str) -> Self {
        let run = format!("tusimple_lanenet_{}_{version_flag}", net_flag.as_str());

        Self {
            model_dir: root.join("model").join(&run),
            tboard_dir: root.join("tboard").join(&run),
            tmp_dir: root.join("tmp"),
        }
    }

    /// Creates the checkpoint and summary directories if absent.
    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.model_dir)?;
        fs::create_dir_all(&self.tboard_dir)?;
        Ok(())
    }
}
