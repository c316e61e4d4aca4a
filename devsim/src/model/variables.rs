//! Fix-point initialisation of exported variables.
//!
//! Some models export variables whose initial values depend on variables
//! exported by other models. These are resolved before the first step by
//! repeated initialisation passes over the model tree: each pass lets every
//! model initialise the variables whose dependencies have become available,
//! until either all variables are initialised or a pass makes no progress,
//! which denotes a dependency cycle.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign};

use super::ModelUri;

/// Fully qualified name of an exported variable.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableKey {
    /// URI of the exporting model.
    pub uri: ModelUri,
    /// Name of the variable within the model.
    pub name: String,
}

impl VariableKey {
    /// Creates a variable key.
    pub fn new(uri: impl Into<ModelUri>, name: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for VariableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.uri, self.name)
    }
}

/// The set of initialised exported variables, shared by all models during
/// initialisation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Variables {
    values: BTreeMap<VariableKey, f64>,
}

impl Variables {
    /// Creates an empty set of variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of an initialised variable.
    pub fn get(&self, key: &VariableKey) -> Option<f64> {
        self.values.get(key).copied()
    }

    /// Sets the value of a variable.
    pub fn set(&mut self, key: VariableKey, value: f64) {
        self.values.insert(key, value);
    }

    /// Returns `true` if the variable has been initialised.
    pub fn is_initialised(&self, key: &VariableKey) -> bool {
        self.values.contains_key(key)
    }

    /// Returns the number of initialised variables.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no variable has been initialised.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates over the initialised variables in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&VariableKey, f64)> {
        self.values.iter().map(|(k, v)| (k, *v))
    }
}

/// Outcome of an initialisation pass.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FixpointProgress {
    /// Number of variables initialised during the pass.
    pub newly_initialised: usize,
    /// Number of variables still awaiting their dependencies.
    pub still_pending: usize,
}

impl FixpointProgress {
    /// Returns `true` if no variable is pending.
    pub fn is_complete(&self) -> bool {
        self.still_pending == 0
    }

    /// Returns `true` if variables are pending but none could be initialised.
    pub fn is_stalled(&self) -> bool {
        self.still_pending != 0 && self.newly_initialised == 0
    }
}

impl Add for FixpointProgress {
    type Output = FixpointProgress;

    fn add(self, rhs: FixpointProgress) -> FixpointProgress {
        FixpointProgress {
            newly_initialised: self.newly_initialised + rhs.newly_initialised,
            still_pending: self.still_pending + rhs.still_pending,
        }
    }
}

impl AddAssign for FixpointProgress {
    fn add_assign(&mut self, rhs: FixpointProgress) {
        *self = *self + rhs;
    }
}

type ComputeFn = Box<dyn Fn(&[f64]) -> f64 + Send + 'static>;

/// An exported variable computed from other variables.
///
/// This is a convenience for implementors of
/// [`AtomicModel::fixpoint_initialise_variables`](super::AtomicModel::fixpoint_initialise_variables):
/// a model keeps its dependent variables in a list and delegates each pass to
/// [`ExportedVariable::initialise_all`].
///
/// # Examples
///
/// ```
/// use devsim::model::{ExportedVariable, ModelUri, VariableKey, Variables};
///
/// let uri = ModelUri::new("room");
/// let mut vars = vec![ExportedVariable::new(
///     "setpoint",
///     vec![VariableKey::new("thermostat", "target")],
///     |deps| deps[0] + 0.5,
/// )];
/// let mut variables = Variables::new();
///
/// let progress = ExportedVariable::initialise_all(&mut vars, &uri, &mut variables);
/// assert_eq!(progress.still_pending, 1);
///
/// variables.set(VariableKey::new("thermostat", "target"), 19.0);
/// let progress = ExportedVariable::initialise_all(&mut vars, &uri, &mut variables);
/// assert!(progress.is_complete());
/// assert_eq!(variables.get(&VariableKey::new("room", "setpoint")), Some(19.5));
/// ```
pub struct ExportedVariable {
    name: String,
    dependencies: Vec<VariableKey>,
    compute: ComputeFn,
    value: Option<f64>,
}

impl ExportedVariable {
    /// Creates a variable computed from the values of its dependencies, in
    /// the order in which they are listed.
    pub fn new<F>(name: impl Into<String>, dependencies: Vec<VariableKey>, compute: F) -> Self
    where
        F: Fn(&[f64]) -> f64 + Send + 'static,
    {
        Self {
            name: name.into(),
            dependencies,
            compute: Box::new(compute),
            value: None,
        }
    }

    /// Creates a variable with a known value.
    pub fn constant(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, Vec::new(), move |_| value)
    }

    /// Returns the name of the variable.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value of the variable once initialised.
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Forgets the value of the variable.
    pub fn reset(&mut self) {
        self.value = None;
    }

    /// Initialises the variable if all its dependencies are available.
    ///
    /// Returns `true` if the variable was initialised by this call.
    pub fn try_initialise(&mut self, uri: &ModelUri, variables: &mut Variables) -> bool {
        if self.value.is_some() {
            return false;
        }
        let inputs: Option<Vec<f64>> = self
            .dependencies
            .iter()
            .map(|key| variables.get(key))
            .collect();
        let Some(inputs) = inputs else {
            return false;
        };

        let value = (self.compute)(&inputs);
        self.value = Some(value);
        variables.set(VariableKey::new(uri.clone(), self.name.clone()), value);

        true
    }

    /// Performs one initialisation pass over a list of variables.
    pub fn initialise_all(
        list: &mut [ExportedVariable],
        uri: &ModelUri,
        variables: &mut Variables,
    ) -> FixpointProgress {
        let mut progress = FixpointProgress::default();
        for var in list.iter_mut() {
            if var.try_initialise(uri, variables) {
                progress.newly_initialised += 1;
            } else if var.value.is_none() {
                progress.still_pending += 1;
            }
        }

        progress
    }
}

impl fmt::Debug for ExportedVariable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportedVariable")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("value", &self.value)
            .finish_non_exhaustive()
    }
}
