use std::{cell::RefCell, collections::HashMap, rc::Rc};

use ndarray::ArrayD;
use rand::Rng;

use super::{ParamKind, ParamSpec};
use crate::error::{Result, TrainErr};

/// Stable handle to a tensor inside a `ParamSet`.
///
/// Ids are only minted by `ParamSet::register`, so every tower that borrows the
/// same set refers to the same tensor through the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(usize);

impl ParamId {
    /// The position of the parameter inside it's set.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A named tensor and it's role.
#[derive(Debug, Clone)]
pub struct Param {
    name: String,
    kind: ParamKind,
    value: ArrayD<f32>,
}

impl Param {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn value(&self) -> &ArrayD<f32> {
        &self.value
    }
}

/// The ordered, name-indexed set of every tensor of a training run: model
/// parameters, normalization statistics, optimizer slots and moving-average
/// shadows, plus the global step counter.
#[derive(Debug, Clone, Default)]
pub struct ParamSet {
    params: Vec<Param>,
    index: HashMap<String, ParamId>,
    global_step: u64,
}

impl ParamSet {
    /// Creates a new empty `ParamSet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a `ParamSet` holding every declared parameter, each filled by
    /// it's own initializer.
    ///
    /// # Arguments
    /// * `specs` - The parameters declared by the model.
    /// * `rng` - The random number generator shared by every initializer.
    ///
    /// # Returns
    /// The initialized set, or an error if an initializer is invalid or a name is repeated.
    pub fn initialize<R>(specs: &[ParamSpec], rng: R) -> Result<Self>
    where
        R: Rng + 'static,
    {
        let rng = Rc::new(RefCell::new(rng));
        let mut params = Self::new();

        for spec in specs {
            let value = spec.init.tensor(&rng, &spec.shape)?;
            params.register(spec.name.clone(), spec.kind, value)?;
        }

        Ok(params)
    }

    /// Adds a new tensor to the set.
    ///
    /// # Arguments
    /// * `name` - The unique name of the tensor.
    /// * `kind` - The role it plays in training.
    /// * `value` - The initial value.
    ///
    /// # Returns
    /// The id of the new tensor, or `DuplicateParam` if the name is taken.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        kind: ParamKind,
        value: ArrayD<f32>,
    ) -> Result<ParamId> {
        let name = name.into();

        if self.index.contains_key(&name) {
            return Err(TrainErr::DuplicateParam(name));
        }

        let id = ParamId(self.params.len());
        self.index.insert(name.clone(), id);
        self.params.push(Param { name, kind, value });
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Looks up the id of a tensor by name.
    pub fn id(&self, name: &str) -> Option<ParamId> {
        self.index.get(name).copied()
    }

    /// Returns the tensor behind `id`.
    ///
    /// # Panics
    /// If `id` wasn't minted by this set.
    pub fn get(&self, id: ParamId) -> &ArrayD<f32> {
        &self.params[id.0].value
    }

    /// Returns the full entry behind `id`.
    ///
    /// # Panics
    /// If `id` wasn't minted by this set.
    pub fn param(&self, id: ParamId) -> &Param {
        &self.params[id.0]
    }

    /// Returns the tensor called `name`, or an `UnknownParam` error.
    pub fn by_name(&self, name: &str) -> Result<&ArrayD<f32>> {
        self.id(name)
            .map(|id| self.get(id))
            .ok_or_else(|| TrainErr::UnknownParam(name.to_string()))
    }

    pub(crate) fn get_mut(&mut self, id: ParamId) -> &mut ArrayD<f32> {
        &mut self.params[id.0].value
    }

    /// Borrows two distinct tensors mutably at once.
    ///
    /// # Panics
    /// If both ids are the same or either wasn't minted by this set.
    pub(crate) fn pair_mut(
        &mut self,
        a: ParamId,
        b: ParamId,
    ) -> (&mut ArrayD<f32>, &mut ArrayD<f32>) {
        assert_ne!(a, b, "pair_mut needs two distinct parameters");

        if a.0 < b.0 {
            let (left, right) = self.params.split_at_mut(b.0);
            (&mut left[a.0].value, &mut right[0].value)
        } else {
            let (left, right) = self.params.split_at_mut(a.0);
            (&mut right[0].value, &mut left[b.0].value)
        }
    }

    /// Overwrites the tensor behind `id` keeping it's shape.
    ///
    /// # Returns
    /// A `ShapeMismatch` error if the shapes differ.
    pub fn assign(&mut self, id: ParamId, value: ArrayD<f32>) -> Result<()> {
        let param = &mut self.params[id.0];

        if param.value.shape() != value.shape() {
            return Err(TrainErr::ShapeMismatch {
                name: param.name.clone(),
                got: value.shape().to_vec(),
                expected: param.value.shape().to_vec(),
            });
        }

        param.value = value;
        Ok(())
    }

    /// Iterates every tensor in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (ParamId, &Param)> {
        self.params
            .iter()
            .enumerate()
            .map(|(i, param)| (ParamId(i), param))
    }

    /// Returns the ids of every tensor of the given kind, in registration order.
    pub fn ids_of_kind(&self, kind: ParamKind) -> Vec<ParamId> {
        self.iter()
            .filter(|(_, param)| param.kind == kind)
            .map(|(id, _)| id)
            .collect()
    }

    /// The total amount of scalars across every tensor of the given kind.
    pub fn num_elements(&self, kind: ParamKind) -> usize {
        self.params
            .iter()
            .filter(|param| param.kind == kind)
            .map(|param| param.value.len())
            .sum()
    }

    pub fn global_step(&self) -> u64 {
        self.global_step
    }

    pub fn set_global_step(&mut self, step: u64) {
        self.global_step = step;
    }

    pub(crate) fn increment_global_step(&mut self) {
        self.global_step += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::initialization::InitSpec;
    use ndarray::arr1;
    use rand::{SeedableRng, rngs::StdRng};

    fn specs() -> Vec<ParamSpec> {
        vec![
            ParamSpec::trainable(
                "head/weights",
                vec![2, 3],
                InitSpec::XavierUniform {
                    fan_in: 3,
                    fan_out: 2,
                },
            ),
            ParamSpec::trainable("head/bias", vec![2], InitSpec::Const { value: 0.0 }),
            ParamSpec::moving_stat("norm/moving_variance", vec![3], 1.0),
        ]
    }

    #[test]
    fn initialize_follows_specs() {
        let params = ParamSet::initialize(&specs(), StdRng::seed_from_u64(7)).unwrap();

        assert_eq!(params.len(), 3);
        assert_eq!(params.by_name("head/weights").unwrap().shape(), [2, 3]);
        assert_eq!(params.by_name("head/bias").unwrap().sum(), 0.0);
        assert_eq!(params.by_name("norm/moving_variance").unwrap().sum(), 3.0);
        assert_eq!(params.ids_of_kind(ParamKind::Trainable).len(), 2);
        assert_eq!(params.num_elements(ParamKind::Trainable), 8);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut params = ParamSet::new();
        params
            .register("w", ParamKind::Trainable, arr1(&[1.0]).into_dyn())
            .unwrap();

        let err = params.register("w", ParamKind::Trainable, arr1(&[2.0]).into_dyn());
        assert!(matches!(err, Err(TrainErr::DuplicateParam(_))));
    }

    #[test]
    fn assign_checks_shape() {
        let mut params = ParamSet::new();
        let id = params
            .register("w", ParamKind::Trainable, arr1(&[1.0, 2.0]).into_dyn())
            .unwrap();

        assert!(params.assign(id, arr1(&[1.0]).into_dyn()).is_err());
        params.assign(id, arr1(&[3.0, 4.0]).into_dyn()).unwrap();
        assert_eq!(params.get(id), &arr1(&[3.0, 4.0]).into_dyn());
    }
}
