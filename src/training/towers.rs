use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::{
    error::{Result, TrainErr},
    model::NormUpdate,
    params::{ParamId, ParamSet},
};

/// The gradients reported by a single replica, one per trainable parameter.
pub type TowerGrads = Vec<(ParamId, ArrayD<f32>)>;

/// Averages the gradients of every tower, parameter by parameter.
///
/// Each parameter's gradients are stacked along a new leading axis and reduced
/// with the arithmetic mean, so the result doesn't depend on the tower order.
///
/// # Arguments
/// * `towers` - The gradients of every tower.
///
/// # Returns
/// One averaged gradient per parameter in the order of the first tower, or
/// `TowerMismatch` if a tower reports a different parameter sequence.
pub fn average_gradients(towers: &[TowerGrads]) -> Result<TowerGrads> {
    let Some((first, rest)) = towers.split_first() else {
        return Ok(Vec::new());
    };

    for (i, tower) in rest.iter().enumerate() {
        let same_params = tower.len() == first.len()
            && tower.iter().zip(first).all(|((a, _), (b, _))| a == b);

        if !same_params {
            return Err(TrainErr::TowerMismatch { tower: i + 1 });
        }
    }

    first
        .iter()
        .enumerate()
        .map(|(k, (id, grad))| {
            let views: Vec<ArrayViewD<f32>> = towers.iter().map(|tower| tower[k].1.view()).collect();

            if let Some(bad) = views.iter().find(|view| view.shape() != grad.shape()) {
                return Err(TrainErr::ShapeMismatch {
                    name: format!("gradient #{}", id.index()),
                    got: bad.shape().to_vec(),
                    expected: grad.shape().to_vec(),
                });
            }

            let stacked = ndarray::stack(Axis(0), &views).map_err(|_| TrainErr::SizeMismatch {
                what: "stacked gradients",
                got: views.len(),
                expected: towers.len(),
            })?;

            let mean = stacked
                .mean_axis(Axis(0))
                .ok_or(TrainErr::SizeMismatch {
                    what: "towers",
                    got: 0,
                    expected: 1,
                })?;

            Ok((*id, mean))
        })
        .collect()
}

/// Writes the new normalization statistics of a training pass into `params`.
pub fn apply_norm_updates(params: &mut ParamSet, updates: Vec<NormUpdate>) -> Result<()> {
    for update in updates {
        params.assign(update.param, update.value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamKind;
    use ndarray::arr1;

    fn ids(n: usize) -> (ParamSet, Vec<ParamId>) {
        let mut params = ParamSet::new();
        let ids = (0..n)
            .map(|i| {
                params
                    .register(format!("p{i}"), ParamKind::Trainable, arr1(&[0.0]).into_dyn())
                    .unwrap()
            })
            .collect();
        (params, ids)
    }

    fn tower(id: ParamId, value: f32) -> TowerGrads {
        vec![(id, arr1(&[value]).into_dyn())]
    }

    #[test]
    fn mean_across_towers() {
        let (_, ids) = ids(1);
        let towers = vec![tower(ids[0], 1.0), tower(ids[0], 3.0), tower(ids[0], 5.0)];

        let averaged = average_gradients(&towers).unwrap();

        assert_eq!(averaged.len(), 1);
        assert_eq!(averaged[0].0, ids[0]);
        assert_eq!(averaged[0].1, arr1(&[3.0]).into_dyn());
    }

    #[test]
    fn order_of_towers_does_not_matter() {
        let (_, ids) = ids(1);
        let forward = vec![tower(ids[0], 1.0), tower(ids[0], 3.0), tower(ids[0], 5.0)];
        let backward = vec![tower(ids[0], 5.0), tower(ids[0], 1.0), tower(ids[0], 3.0)];

        assert_eq!(
            average_gradients(&forward).unwrap()[0].1,
            average_gradients(&backward).unwrap()[0].1
        );
    }

    #[test]
    fn single_tower_is_left_untouched() {
        let (_, ids) = ids(1);
        let averaged = average_gradients(&[tower(ids[0], 2.5)]).unwrap();
        assert_eq!(averaged[0].1, arr1(&[2.5]).into_dyn());
    }

    #[test]
    fn mismatched_towers_are_rejected() {
        let (_, ids) = ids(2);
        let towers = vec![tower(ids[0], 1.0), tower(ids[1], 3.0)];

        let err = average_gradients(&towers).unwrap_err();
        assert!(matches!(err, TrainErr::TowerMismatch { tower: 1 }));
    }

    #[test]
    fn norm_updates_overwrite_statistics() {
        let (mut params, ids) = ids(1);
        let updates = vec![NormUpdate {
            param: ids[0],
            value: arr1(&[0.5]).into_dyn(),
        }];

        apply_norm_updates(&mut params, updates).unwrap();
        assert_eq!(params.get(ids[0]), &arr1(&[0.5]).into_dyn());
    }
}
