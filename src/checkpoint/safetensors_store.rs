use std::{
    collections::HashMap,
    fs, io,
    path::{Path, PathBuf},
};

use log::{debug, info, warn};
use ndarray::{ArrayD, IxDyn};
use safetensors::{Dtype, SafeTensors, tensor::TensorView};

use super::{
    CheckpointState, CheckpointStore, EXTENSION, RestoreReport, RestoreScope, resolve_checkpoint,
};
use crate::{
    error::{Result, TrainErr},
    params::{ParamId, ParamKind, ParamSet},
};

const GLOBAL_STEP_KEY: &str = "global_step";

/// Stores checkpoints as safetensors files in a single directory, keeping the
/// `max_to_keep` most recent ones and tracking them in a `checkpoint.json` file.
#[derive(Debug)]
pub struct SafetensorsCheckpointer {
    dir: PathBuf,
    max_to_keep: usize,
    state: CheckpointState,
}

impl SafetensorsCheckpointer {
    /// Creates a new `SafetensorsCheckpointer`, picking up the retained checkpoints
    /// of a previous run in `dir`.
    ///
    /// # Arguments
    /// * `dir` - The directory checkpoints are written to, created if absent.
    /// * `max_to_keep` - How many checkpoints to retain.
    pub fn new(dir: impl Into<PathBuf>, max_to_keep: usize) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let state = CheckpointState::load(&dir)?;

        Ok(Self {
            dir,
            max_to_keep,
            state,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The retained checkpoints, oldest first.
    pub fn retained(&self) -> &[PathBuf] {
        &self.state.all
    }

    pub fn latest(&self) -> Option<&Path> {
        self.state.latest.as_deref()
    }

    fn evict(&self, paths: Vec<PathBuf>) {
        for path in paths {
            match fs::remove_file(&path) {
                Ok(()) => debug!("evicted checkpoint {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("failed to evict checkpoint {}: {e}", path.display()),
            }
        }
    }
}

impl CheckpointStore for SafetensorsCheckpointer {
    fn save(&mut self, params: &ParamSet, prefix: &str, global_step: u64) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{prefix}-{global_step}.{EXTENSION}"));

        let buffers: Vec<(&str, Vec<usize>, Vec<f32>)> = params
            .iter()
            .map(|(_, param)| {
                let value = param.value();
                (param.name(), value.shape().to_vec(), value.iter().copied().collect())
            })
            .collect();

        let views = buffers
            .iter()
            .map(|(name, shape, data)| {
                let bytes = bytemuck::cast_slice(data.as_slice());
                TensorView::new(Dtype::F32, shape.clone(), bytes)
                    .map(|view| (name.to_string(), view))
                    .map_err(TrainErr::from)
            })
            .collect::<Result<Vec<_>>>()?;

        let metadata = HashMap::from([(GLOBAL_STEP_KEY.to_string(), global_step.to_string())]);
        safetensors::serialize_to_file(views, &Some(metadata), &path)?;

        let evicted = self.state.push(path.clone(), self.max_to_keep);
        self.state.store(&self.dir)?;
        self.evict(evicted);

        info!("saved checkpoint {}", path.display());
        Ok(path)
    }

    fn restore(
        &self,
        params: &mut ParamSet,
        path: &Path,
        scope: RestoreScope,
    ) -> Result<RestoreReport> {
        let path = resolve_checkpoint(path)?;
        let bytes = fs::read(&path)?;
        let tensors = SafeTensors::deserialize(&bytes)?;

        let global_step = match scope {
            RestoreScope::Full => Some(read_global_step(&bytes)?),
            RestoreScope::Scratch => None,
        };

        let mut staged: Vec<(ParamId, ArrayD<f32>)> = Vec::new();
        let mut missing = Vec::new();

        for (id, param) in params.iter() {
            if scope == RestoreScope::Scratch && param.kind() == ParamKind::OptimizerSlot {
                continue;
            }

            let tensor = match tensors.tensor(param.name()) {
                Ok(tensor) => tensor,
                Err(_) if scope == RestoreScope::Scratch => {
                    missing.push(param.name().to_string());
                    continue;
                }
                Err(_) => {
                    return Err(TrainErr::Checkpoint(format!(
                        "{} holds no tensor '{}'",
                        path.display(),
                        param.name()
                    )));
                }
            };

            let value = to_array(param.name(), &tensor)?;
            if value.shape() != param.value().shape() {
                return Err(TrainErr::ShapeMismatch {
                    name: param.name().to_string(),
                    got: value.shape().to_vec(),
                    expected: param.value().shape().to_vec(),
                });
            }

            staged.push((id, value));
        }

        let restored = staged.len();
        for (id, value) in staged {
            params.assign(id, value)?;
        }

        if let Some(step) = global_step {
            params.set_global_step(step);
        }

        Ok(RestoreReport {
            restored,
            missing,
            global_step,
        })
    }
}

fn read_global_step(bytes: &[u8]) -> Result<u64> {
    let (_, metadata) = SafeTensors::read_metadata(bytes)?;

    metadata
        .metadata()
        .as_ref()
        .and_then(|meta| meta.get(GLOBAL_STEP_KEY))
        .and_then(|step| step.parse().ok())
        .ok_or_else(|| TrainErr::Checkpoint("checkpoint holds no global step".into()))
}

fn to_array(name: &str, tensor: &TensorView<'_>) -> Result<ArrayD<f32>> {
    if tensor.dtype() != Dtype::F32 {
        return Err(TrainErr::Checkpoint(format!(
            "tensor '{name}' is {:?}, expected F32",
            tensor.dtype()
        )));
    }

    // The tensor data isn't guaranteed to be aligned for f32.
    let values = tensor
        .data()
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();

    ArrayD::from_shape_vec(IxDyn(tensor.shape()), values).map_err(|_| TrainErr::SizeMismatch {
        what: "checkpoint tensor",
        got: tensor.data().len() / 4,
        expected: tensor.shape().iter().product(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    fn params(w: f32) -> ParamSet {
        let mut params = ParamSet::new();
        params
            .register("w", ParamKind::Trainable, arr1(&[w, w]).into_dyn())
            .unwrap();
        params
            .register("w/Momentum", ParamKind::OptimizerSlot, arr1(&[w, w]).into_dyn())
            .unwrap();
        params.set_global_step(7);
        params
    }

    #[test]
    fn full_restore_brings_back_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SafetensorsCheckpointer::new(dir.path(), 10).unwrap();
        let path = store.save(&params(1.0), "model.ckpt", 7).unwrap();
        assert!(path.ends_with("model.ckpt-7.safetensors"));

        let mut target = params(0.0);
        target.set_global_step(0);
        let report = store
            .restore(&mut target, &dir.path().join("model.ckpt-7"), RestoreScope::Full)
            .unwrap();

        assert_eq!(report.restored, 2);
        assert_eq!(report.global_step, Some(7));
        assert_eq!(target.global_step(), 7);
        assert_eq!(target.by_name("w/Momentum").unwrap()[0], 1.0);
    }

    #[test]
    fn scratch_restore_skips_slots_and_step() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SafetensorsCheckpointer::new(dir.path(), 10).unwrap();
        let path = store.save(&params(1.0), "model.ckpt", 7).unwrap();

        let mut target = params(0.0);
        target
            .register("extra", ParamKind::Trainable, arr1(&[5.0]).into_dyn())
            .unwrap();
        target.set_global_step(0);

        let report = store.restore(&mut target, &path, RestoreScope::Scratch).unwrap();

        assert_eq!(report.missing, ["extra"]);
        assert_eq!(target.global_step(), 0);
        assert_eq!(target.by_name("w").unwrap()[0], 1.0);
        assert_eq!(target.by_name("w/Momentum").unwrap()[0], 0.0);
        assert_eq!(target.by_name("extra").unwrap()[0], 5.0);
    }

    #[test]
    fn failed_restore_leaves_params_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SafetensorsCheckpointer::new(dir.path(), 10).unwrap();
        let path = store.save(&params(1.0), "model.ckpt", 7).unwrap();

        let mut target = params(0.0);
        target
            .register("extra", ParamKind::Trainable, arr1(&[5.0]).into_dyn())
            .unwrap();

        assert!(store.restore(&mut target, &path, RestoreScope::Full).is_err());
        assert_eq!(target.by_name("w").unwrap()[0], 0.0);
        assert_eq!(target.global_step(), 7);
    }

    #[test]
    fn keeps_only_the_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SafetensorsCheckpointer::new(dir.path(), 2).unwrap();

        let paths: Vec<_> = (0..3)
            .map(|step| store.save(&params(1.0), "model.ckpt", step).unwrap())
            .collect();

        assert!(!paths[0].exists());
        assert!(paths[1].exists() && paths[2].exists());
        assert_eq!(store.retained(), &paths[1..]);

        let reopened = SafetensorsCheckpointer::new(dir.path(), 2).unwrap();
        assert_eq!(reopened.latest(), Some(paths[2].as_path()));
    }
}
