use std::{
    fs, io,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// The retained checkpoints of a directory, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub latest: Option<PathBuf>,
    pub all: Vec<PathBuf>,
}

impl CheckpointState {
    pub const FILE_NAME: &'static str = "checkpoint.json";

    /// Loads the state file of `dir`, or an empty state if there is none.
    pub fn load(dir: &Path) -> Result<Self> {
        match fs::read_to_string(dir.join(Self::FILE_NAME)) {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn store(&self, dir: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(dir.join(Self::FILE_NAME), json)?;
        Ok(())
    }

    /// Records a new checkpoint as the latest one.
    ///
    /// # Returns
    /// The checkpoints evicted to keep at most `max_to_keep`.
    pub fn push(&mut self, path: PathBuf, max_to_keep: usize) -> Vec<PathBuf> {
        self.all.retain(|p| p != &path);
        self.all.push(path.clone());
        self.latest = Some(path);

        let excess = self.all.len().saturating_sub(max_to_keep);
        self.all.drain(..excess).collect()
    }
}
