mod safetensors_store;
mod state;

pub use safetensors_store::SafetensorsCheckpointer;
pub use state::CheckpointState;

use std::path::{Path, PathBuf};

use crate::{
    error::{Result, TrainErr},
    params::ParamSet,
};

/// The file extension every checkpoint carries on disk.
pub const EXTENSION: &str = "safetensors";

/// Which tensors a restore reads back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreScope {
    /// Every tensor and the global step; anything missing fails the restore.
    Full,
    /// Every tensor found in the checkpoint except optimizer slots; the global
    /// step is left untouched and missing tensors keep their current value.
    Scratch,
}

/// What a successful restore did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    /// Parameters the checkpoint didn't hold.
    pub missing: Vec<String>,
    pub global_step: Option<u64>,
}

/// Persists and restores parameter sets.
pub trait CheckpointStore {
    /// Saves every tensor in `params`.
    ///
    /// # Arguments
    /// * `params` - The parameters to save.
    /// * `prefix` - The checkpoint name, the global step is appended to it.
    /// * `global_step` - The step the checkpoint is tagged with.
    ///
    /// # Returns
    /// The path of the new checkpoint.
    fn save(&mut self, params: &ParamSet, prefix: &str, global_step: u64) -> Result<PathBuf>;

    /// Restores `params` from the checkpoint at `path`.
    ///
    /// Either every selected tensor is restored or `params` is left untouched.
    ///
    /// # Arguments
    /// * `params` - The parameters to overwrite.
    /// * `path` - The checkpoint, with or without it's extension.
    /// * `scope` - Which tensors to read.
    fn restore(
        &self,
        params: &mut ParamSet,
        path: &Path,
        scope: RestoreScope,
    ) -> Result<RestoreReport>;
}

/// Resolves a checkpoint path given with or without it's extension.
///
/// # Returns
/// The existing file, or `WeightsNotFound` if neither form exists.
pub fn resolve_checkpoint(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }

    let mut with_ext = path.as_os_str().to_owned();
    with_ext.push(".");
    with_ext.push(EXTENSION);
    let with_ext = PathBuf::from(with_ext);

    if with_ext.is_file() {
        return Ok(with_ext);
    }

    Err(TrainErr::WeightsNotFound(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn resolves_with_and_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("model.ckpt-10.safetensors");
        fs::write(&file, b"").unwrap();

        assert_eq!(resolve_checkpoint(&file).unwrap(), file);
        assert_eq!(
            resolve_checkpoint(&dir.path().join("model.ckpt-10")).unwrap(),
            file
        );
        assert!(matches!(
            resolve_checkpoint(&dir.path().join("other")),
            Err(TrainErr::WeightsNotFound(_))
        ));
    }
}
