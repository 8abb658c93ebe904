mod common;

use common::{STAT, ScriptedNet, WEIGHT};
use lanenet_trainer::{
    LaneNet, ParamKind, ParamSet,
    checkpoint::{CheckpointStore, RestoreScope, SafetensorsCheckpointer},
    optimization::{ExponentialMovingAverage, MomentumOptimizer},
};
use ndarray::arr1;
use rand::{SeedableRng, rngs::StdRng};

fn full_set(value: f32) -> ParamSet {
    let specs = ScriptedNet::default().param_specs();
    let mut params = ParamSet::initialize(&specs, StdRng::seed_from_u64(0)).unwrap();
    MomentumOptimizer::new(&mut params, 0.9).unwrap();
    ExponentialMovingAverage::new(&mut params, 0.99).unwrap();

    let ids: Vec<_> = params.iter().map(|(id, _)| id).collect();
    for id in ids {
        params.assign(id, arr1(&[value]).into_dyn()).unwrap();
    }
    params
}

#[test]
fn checkpoints_carry_slots_shadows_and_step() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SafetensorsCheckpointer::new(dir.path(), 3).unwrap();

    let mut saved = full_set(4.0);
    saved.set_global_step(17);
    let path = store.save(&saved, "tusimple_lanenet_vgg", 17).unwrap();

    let mut restored = full_set(0.0);
    let report = store.restore(&mut restored, &path, RestoreScope::Full).unwrap();

    assert_eq!(report.global_step, Some(17));
    assert_eq!(restored.global_step(), 17);
    for (_, param) in restored.iter() {
        assert_eq!(param.value()[[0]], 4.0, "{}", param.name());
    }
    assert_eq!(restored.ids_of_kind(ParamKind::Shadow).len(), 2);
}

#[test]
fn only_the_newest_checkpoints_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SafetensorsCheckpointer::new(dir.path(), 2).unwrap();
    let params = full_set(1.0);

    let paths: Vec<_> = (0..4)
        .map(|step| store.save(&params, "run", step).unwrap())
        .collect();

    assert!(!paths[0].exists());
    assert!(!paths[1].exists());
    assert_eq!(store.retained(), &paths[2..]);
    assert_eq!(store.latest(), Some(paths[3].as_path()));

    // a new store picks the retained list back up
    let reopened = SafetensorsCheckpointer::new(dir.path(), 2).unwrap();
    assert_eq!(reopened.retained(), &paths[2..]);
}

#[test]
fn scratch_restore_keeps_fresh_optimizer_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SafetensorsCheckpointer::new(dir.path(), 3).unwrap();
    let path = store.save(&full_set(4.0), "prior", 9).unwrap();

    let mut fresh = full_set(0.0);
    store.restore(&mut fresh, &path, RestoreScope::Scratch).unwrap();

    assert_eq!(fresh.by_name(WEIGHT).unwrap()[[0]], 4.0);
    assert_eq!(fresh.by_name(STAT).unwrap()[[0]], 4.0);
    assert_eq!(fresh.by_name("w/Momentum").unwrap()[[0]], 0.0);
    assert_eq!(fresh.global_step(), 0);
}
