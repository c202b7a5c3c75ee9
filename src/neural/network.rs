//! Network graph: unit arena, topological ordering, forward and backward passes.

use super::activation::Activation;
use super::unit::{Neuron, Role, Synapse, Unit, UnitIndex, UnitKind, WeightMutation};
use crate::mutation::Mutation;
use ndarray::Array1;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

/// Errors raised while building or running a network
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NetworkError {
    #[error("cycle detected, could not order: {}", unresolved.join(", "))]
    Cycle { unresolved: Vec<String> },

    #[error("unit {unit} has a synapse from a unit outside the network")]
    DanglingSource { unit: String },

    #[error("shape mismatch: expected {expected} values, found {found}")]
    ShapeMismatch { expected: usize, found: usize },

    #[error("duplicate unit id: {0}")]
    DuplicateUnit(String),

    #[error("unknown unit: {0}")]
    UnknownUnit(String),

    #[error("unit {0} is an input and cannot receive synapses")]
    NotANeuron(String),
}

/// Build state of a network
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Lifecycle {
    /// Topology may change, no processing order cached
    #[default]
    Building,
    /// Processing order computed and valid
    Finalized,
}

/// Values fed into or read out of a network
#[derive(Clone, Debug, PartialEq)]
pub enum Signals {
    Positional(Vec<f64>),
    Named(BTreeMap<String, f64>),
}

impl Signals {
    pub fn len(&self) -> usize {
        match self {
            Signals::Positional(v) => v.len(),
            Signals::Named(m) => m.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Feed-forward network over an arena of units.
///
/// Inputs, hidden and output units share one arena; synapses point at
/// sources through [`UnitIndex`] handles. Cloning yields an independent copy
/// with identical ids and handles.
#[derive(Clone, Debug, Default)]
pub struct Network {
    units: Vec<Unit>,
    signals: Vec<f64>,
    /// Correction signal each unit received during the last backward pass
    corrections: Vec<f64>,
    ids: HashMap<String, UnitIndex>,

    input_units: Vec<UnitIndex>,
    output_units: Vec<UnitIndex>,
    hidden_units: Vec<UnitIndex>,
    /// Hidden and output units, every source before its destination
    ordered_units: Vec<UnitIndex>,

    named_inputs: HashMap<String, usize>,
    named_outputs: HashMap<String, usize>,
    named_output_mode: bool,

    lifecycle: Lifecycle,
    error_delta_sum: f64,
}

impl Network {
    /// Create an empty network in the building state
    pub fn new() -> Self {
        Self::default()
    }

    /// Return outputs keyed by name instead of by position
    pub fn with_named_outputs(mut self, named: bool) -> Self {
        self.named_output_mode = named;
        self
    }

    pub fn set_named_outputs(&mut self, named: bool) {
        self.named_output_mode = named;
    }

    pub fn named_outputs(&self) -> bool {
        self.named_output_mode
    }

    // ---- building ----------------------------------------------------------

    pub fn add_input(&mut self, name: &str) -> Result<UnitIndex, NetworkError> {
        let index = self.push_unit(Unit::input(Role::Input.id(name)))?;
        self.named_inputs.insert(name.to_string(), self.input_units.len());
        self.input_units.push(index);
        Ok(index)
    }

    pub fn add_output(
        &mut self,
        name: &str,
        activation: Activation,
        bias: f64,
    ) -> Result<UnitIndex, NetworkError> {
        let neuron = Neuron::new(activation, bias);
        let index = self.push_unit(Unit::neuron(Role::Output.id(name), neuron))?;
        self.named_outputs.insert(name.to_string(), self.output_units.len());
        self.output_units.push(index);
        Ok(index)
    }

    pub fn add_hidden(
        &mut self,
        name: &str,
        activation: Activation,
        bias: f64,
    ) -> Result<UnitIndex, NetworkError> {
        let neuron = Neuron::new(activation, bias);
        let index = self.push_unit(Unit::neuron(Role::Hidden.id(name), neuron))?;
        self.hidden_units.push(index);
        Ok(index)
    }

    fn push_unit(&mut self, unit: Unit) -> Result<UnitIndex, NetworkError> {
        if self.ids.contains_key(&unit.id) {
            return Err(NetworkError::DuplicateUnit(unit.id));
        }
        let index = UnitIndex(self.units.len());
        self.ids.insert(unit.id.clone(), index);
        self.units.push(unit);
        self.signals.push(0.0);
        self.corrections.push(0.0);
        self.invalidate();
        Ok(index)
    }

    /// Add a synapse `source -> destination`
    pub fn connect(
        &mut self,
        destination: UnitIndex,
        source: UnitIndex,
        weight: f64,
    ) -> Result<(), NetworkError> {
        if source.0 >= self.units.len() {
            return Err(NetworkError::UnknownUnit(format!("#{}", source.0)));
        }
        let unit = self
            .units
            .get_mut(destination.0)
            .ok_or_else(|| NetworkError::UnknownUnit(format!("#{}", destination.0)))?;
        let id = unit.id.clone();
        let neuron = unit.as_neuron_mut().ok_or(NetworkError::NotANeuron(id))?;
        neuron.connect(source, weight);
        self.invalidate();
        Ok(())
    }

    /// Add a synapse between two units addressed by id
    pub fn connect_ids(
        &mut self,
        destination: &str,
        source: &str,
        weight: f64,
    ) -> Result<(), NetworkError> {
        let destination = self.require(destination)?;
        let source = self.require(source)?;
        self.connect(destination, source, weight)
    }

    fn require(&self, id: &str) -> Result<UnitIndex, NetworkError> {
        self.index_of(id)
            .ok_or_else(|| NetworkError::UnknownUnit(id.to_string()))
    }

    fn invalidate(&mut self) {
        if self.lifecycle == Lifecycle::Finalized {
            log::debug!("network topology changed, processing order dropped");
        }
        self.lifecycle = Lifecycle::Building;
        self.ordered_units.clear();
    }

    // ---- accessors ---------------------------------------------------------

    pub fn index_of(&self, id: &str) -> Option<UnitIndex> {
        self.ids.get(id).copied()
    }

    pub fn unit(&self, index: UnitIndex) -> Option<&Unit> {
        self.units.get(index.0)
    }

    pub fn neuron(&self, index: UnitIndex) -> Option<&Neuron> {
        self.units.get(index.0).and_then(Unit::as_neuron)
    }

    /// Mutable access to a neuron. Drops the cached order, since synapses
    /// may be added through the returned reference.
    pub fn neuron_mut(&mut self, index: UnitIndex) -> Option<&mut Neuron> {
        self.invalidate();
        self.units.get_mut(index.0).and_then(Unit::as_neuron_mut)
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn inputs(&self) -> &[UnitIndex] {
        &self.input_units
    }

    pub fn outputs(&self) -> &[UnitIndex] {
        &self.output_units
    }

    pub fn hidden(&self) -> &[UnitIndex] {
        &self.hidden_units
    }

    /// Processing order; empty until the network is finalized
    pub fn ordered_units(&self) -> &[UnitIndex] {
        &self.ordered_units
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_finalized(&self) -> bool {
        self.lifecycle == Lifecycle::Finalized
    }

    /// Current output value of a unit
    pub fn signal(&self, index: UnitIndex) -> f64 {
        self.signals.get(index.0).copied().unwrap_or(0.0)
    }

    /// Correction signal a unit received during the last backward pass
    pub fn correction_signal(&self, index: UnitIndex) -> f64 {
        self.corrections.get(index.0).copied().unwrap_or(0.0)
    }

    /// Sum of absolute corrections produced by the last backward pass
    pub fn error_delta_sum(&self) -> f64 {
        self.error_delta_sum
    }

    /// Local name of a unit (its id without the role prefix)
    pub fn local_name(&self, index: UnitIndex) -> Option<&str> {
        let id = &self.units.get(index.0)?.id;
        Role::split(id).map(|(_, name)| name)
    }

    /// Number of biases plus weights
    pub fn parameter_count(&self) -> usize {
        self.units
            .iter()
            .filter_map(Unit::as_neuron)
            .map(|n| n.synapses.len() + 1)
            .sum()
    }

    pub fn synapse_count(&self) -> usize {
        self.units
            .iter()
            .filter_map(Unit::as_neuron)
            .map(|n| n.synapses.len())
            .sum()
    }

    /// Check the network has no NaN/Inf parameters
    pub fn is_valid(&self) -> bool {
        self.units
            .iter()
            .filter_map(Unit::as_neuron)
            .all(Neuron::is_valid)
    }

    // ---- ordering ----------------------------------------------------------

    /// Compute the processing order and move to [`Lifecycle::Finalized`].
    ///
    /// No-op when already finalized.
    pub fn finalize(&mut self) -> Result<(), NetworkError> {
        if self.lifecycle == Lifecycle::Finalized {
            return Ok(());
        }

        self.ordered_units = self.compute_order()?;
        self.lifecycle = Lifecycle::Finalized;
        log::debug!(
            "network finalized: {} inputs, {} hidden, {} outputs",
            self.input_units.len(),
            self.hidden_units.len(),
            self.output_units.len()
        );
        Ok(())
    }

    /// Topological order of hidden and output units.
    ///
    /// Greedy fixed point: starting from the inputs, repeatedly move every
    /// unit whose sources are all determined into the order. A scan that
    /// makes no progress means a cycle or a dangling synapse.
    pub fn compute_order(&self) -> Result<Vec<UnitIndex>, NetworkError> {
        if self.lifecycle == Lifecycle::Finalized {
            return Ok(self.ordered_units.clone());
        }

        let mut determined: HashSet<UnitIndex> = self.input_units.iter().copied().collect();
        let mut remaining: Vec<UnitIndex> = self
            .hidden_units
            .iter()
            .chain(&self.output_units)
            .copied()
            .collect();
        let mut ordered = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let before = remaining.len();

            remaining.retain(|&index| {
                let ready = self.units[index.0].as_neuron().map_or(true, |neuron| {
                    neuron
                        .synapses
                        .iter()
                        .all(|s| determined.contains(&s.source))
                });
                if ready {
                    ordered.push(index);
                    determined.insert(index);
                }
                !ready
            });

            if remaining.len() == before {
                return Err(self.structural_error(&remaining));
            }
        }

        Ok(ordered)
    }

    fn structural_error(&self, unresolved: &[UnitIndex]) -> NetworkError {
        let members: HashSet<UnitIndex> = self
            .input_units
            .iter()
            .chain(&self.hidden_units)
            .chain(&self.output_units)
            .copied()
            .collect();

        for &index in unresolved {
            let unit = &self.units[index.0];
            let dangling = unit
                .as_neuron()
                .map_or(false, |n| n.synapses.iter().any(|s| !members.contains(&s.source)));
            if dangling {
                return NetworkError::DanglingSource {
                    unit: unit.id.clone(),
                };
            }
        }

        NetworkError::Cycle {
            unresolved: unresolved
                .iter()
                .map(|i| self.units[i.0].id.clone())
                .collect(),
        }
    }

    // ---- forward -----------------------------------------------------------

    /// Assign input values by position
    pub fn set_inputs(&mut self, values: &[f64]) -> Result<(), NetworkError> {
        if values.len() != self.input_units.len() {
            return Err(NetworkError::ShapeMismatch {
                expected: self.input_units.len(),
                found: values.len(),
            });
        }
        for (&index, &value) in self.input_units.iter().zip(values) {
            self.signals[index.0] = value;
        }
        Ok(())
    }

    /// Assign input values by name, ignoring unknown names
    pub fn set_named_inputs<'a, I>(&mut self, values: I)
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        for (name, value) in values {
            if let Some(&position) = self.named_inputs.get(name) {
                let index = self.input_units[position];
                self.signals[index.0] = value;
            }
        }
    }

    /// Run every ordered unit once
    pub fn forward_signal(&mut self) -> Result<(), NetworkError> {
        self.finalize()?;

        for &index in &self.ordered_units {
            if let UnitKind::Neuron(neuron) = &mut self.units[index.0].kind {
                let signal = neuron.forward(&self.signals);
                self.signals[index.0] = signal;
            }
        }
        Ok(())
    }

    /// Output values by position
    pub fn output_signals(&self) -> Vec<f64> {
        self.output_units
            .iter()
            .map(|index| self.signals[index.0])
            .collect()
    }

    /// Output values keyed by local name
    pub fn named_output_signals(&self) -> BTreeMap<String, f64> {
        self.named_outputs
            .iter()
            .map(|(name, &position)| {
                let index = self.output_units[position];
                (name.clone(), self.signals[index.0])
            })
            .collect()
    }

    /// Forward cycle: assign inputs, run the network, read the outputs
    /// in the network's configured output mode.
    pub fn process(&mut self, inputs: &Signals) -> Result<Signals, NetworkError> {
        self.finalize()?;

        match inputs {
            Signals::Positional(values) => self.set_inputs(values)?,
            Signals::Named(values) => {
                self.set_named_inputs(values.iter().map(|(k, v)| (k.as_str(), *v)))
            }
        }
        self.forward_signal()?;

        if self.named_output_mode {
            Ok(Signals::Named(self.named_output_signals()))
        } else {
            Ok(Signals::Positional(self.output_signals()))
        }
    }

    /// Positional forward cycle, independent of the output mode
    pub fn process_slice(&mut self, inputs: &[f64]) -> Result<Vec<f64>, NetworkError> {
        self.finalize()?;
        self.set_inputs(inputs)?;
        self.forward_signal()?;
        Ok(self.output_signals())
    }

    // ---- error and backward ------------------------------------------------

    /// `signal_i - expected_i` for every output unit
    pub fn error_vector(&self, expected: &[f64]) -> Result<Array1<f64>, NetworkError> {
        if expected.len() != self.output_units.len() {
            return Err(NetworkError::ShapeMismatch {
                expected: self.output_units.len(),
                found: expected.len(),
            });
        }
        Ok(self
            .output_units
            .iter()
            .zip(expected)
            .map(|(index, e)| self.signals[index.0] - e)
            .collect())
    }

    /// Back-propagate an error delta from the outputs.
    ///
    /// Clears every correction, seeds the outputs with `delta` and walks the
    /// order in reverse. Returns the error-delta sum.
    pub fn backward_signal(&mut self, delta: &Array1<f64>, slippy: bool) -> Result<f64, NetworkError> {
        self.propagate(delta, slippy, true)
    }

    /// Like [`backward_signal`](Self::backward_signal) but keeps the bias and
    /// synapse corrections already accumulated, so several samples can share
    /// one adapt step.
    pub fn accumulate_backward(
        &mut self,
        delta: &Array1<f64>,
        slippy: bool,
    ) -> Result<f64, NetworkError> {
        self.propagate(delta, slippy, false)
    }

    fn propagate(
        &mut self,
        delta: &Array1<f64>,
        slippy: bool,
        reset_parameters: bool,
    ) -> Result<f64, NetworkError> {
        self.finalize()?;
        if delta.len() != self.output_units.len() {
            return Err(NetworkError::ShapeMismatch {
                expected: self.output_units.len(),
                found: delta.len(),
            });
        }

        self.corrections.iter_mut().for_each(|c| *c = 0.0);
        if reset_parameters {
            self.reset_corrections();
        }
        for (index, d) in self.output_units.iter().zip(delta.iter()) {
            self.corrections[index.0] += d;
        }

        let mut sum = 0.0;
        for &index in self.ordered_units.iter().rev() {
            let correction_signal = self.corrections[index.0];
            if let UnitKind::Neuron(neuron) = &mut self.units[index.0].kind {
                sum += neuron.backward(
                    correction_signal,
                    &self.signals,
                    &mut self.corrections,
                    slippy,
                );
            }
        }

        self.error_delta_sum = sum;
        Ok(sum)
    }

    /// Clear accumulated bias and synapse corrections
    pub fn reset_corrections(&mut self) {
        for neuron in self.units.iter_mut().filter_map(Unit::as_neuron_mut) {
            neuron.reset_corrections();
        }
    }

    /// One gradient-descent-with-momentum step over every neuron
    pub fn adapt(&mut self, rate: f64, momentum: f64) {
        for neuron in self.units.iter_mut().filter_map(Unit::as_neuron_mut) {
            neuron.adapt(rate, momentum);
        }
    }

    // ---- mutation ----------------------------------------------------------

    /// Mutate one scalar of one uniformly chosen hidden or output neuron.
    ///
    /// Weight changes keep the processing order valid.
    pub fn mutate_one_weight<R: Rng + ?Sized>(
        &mut self,
        mutation: &Mutation,
        rng: &mut R,
    ) -> Option<(UnitIndex, WeightMutation)> {
        let count = self.hidden_units.len() + self.output_units.len();
        if count == 0 {
            return None;
        }

        let pick = rng.gen_range(0..count);
        let index = if pick < self.hidden_units.len() {
            self.hidden_units[pick]
        } else {
            self.output_units[pick - self.hidden_units.len()]
        };

        let neuron = self.units[index.0].as_neuron_mut()?;
        Some((index, neuron.mutate_one_weight(mutation, rng)))
    }

    /// Synapses of a neuron as `(source id, weight)` pairs
    pub fn synapses_of(&self, index: UnitIndex) -> Vec<(&str, f64)> {
        self.neuron(index)
            .map(|n| {
                n.synapses
                    .iter()
                    .map(|s: &Synapse| (self.units[s.source.0].id.as_str(), s.weight))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Euclidean norm of an error vector
pub fn cost(error: &Array1<f64>) -> f64 {
    error.dot(error).sqrt()
}

/// Error vector scaled to unit norm, or all zero when `cost` is zero
pub fn error_delta(error: &Array1<f64>, cost: f64) -> Array1<f64> {
    if cost == 0.0 {
        Array1::zeros(error.len())
    } else {
        error / cost
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Network: {} inputs, {} hidden, {} outputs, {} synapses ({:?})",
            self.input_units.len(),
            self.hidden_units.len(),
            self.output_units.len(),
            self.synapse_count(),
            self.lifecycle
        )?;
        for unit in &self.units {
            if let Some(neuron) = unit.as_neuron() {
                write!(
                    f,
                    "  {} [{}] bias={:.4}",
                    unit.id, neuron.activation, neuron.bias
                )?;
                for synapse in &neuron.synapses {
                    write!(
                        f,
                        " {}*{:.4}",
                        self.units[synapse.source.0].id, synapse.weight
                    )?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
