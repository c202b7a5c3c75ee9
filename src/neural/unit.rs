//! Units of a network: plain inputs, neurons and the synapses feeding them.
//!
//! Units live in an arena owned by the [`Network`](super::Network). A synapse
//! never owns its source; it holds a [`UnitIndex`] into that arena. Signals
//! and received corrections are stored by the network in flat arrays indexed
//! the same way, so a neuron can be updated while its sources are read.

use super::activation::Activation;
use crate::mutation::Mutation;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to a unit inside a network's arena
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitIndex(pub usize);

/// Role of a unit, encoded as the prefix of its id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Input,
    Hidden,
    Output,
}

impl Role {
    pub fn prefix(self) -> &'static str {
        match self {
            Role::Input => "i:",
            Role::Hidden => "h:",
            Role::Output => "o:",
        }
    }

    /// Full unit id for a local name
    pub fn id(self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }

    /// Split a unit id into its role and local name
    pub fn split(id: &str) -> Option<(Role, &str)> {
        [Role::Input, Role::Hidden, Role::Output]
            .into_iter()
            .find_map(|role| id.strip_prefix(role.prefix()).map(|name| (role, name)))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Input => f.write_str("input"),
            Role::Hidden => f.write_str("hidden"),
            Role::Output => f.write_str("output"),
        }
    }
}

/// Weighted edge from a source unit into a neuron
#[derive(Clone, Debug, PartialEq)]
pub struct Synapse {
    pub source: UnitIndex,
    pub weight: f64,
    /// Accumulated gradient term, cleared by every adapt step
    pub correction: f64,
    pub correction_momentum: f64,
}

impl Synapse {
    pub fn new(source: UnitIndex, weight: f64) -> Self {
        Self {
            source,
            weight,
            correction: 0.0,
            correction_momentum: 0.0,
        }
    }
}

/// What a single parametric mutation touched
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationTarget {
    Bias,
    /// Position of the synapse in the neuron's synapse list
    Synapse(usize),
}

/// Telemetry record of one parametric mutation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightMutation {
    pub target: MutationTarget,
    pub delta: f64,
}

impl fmt::Display for WeightMutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.target {
            MutationTarget::Bias => write!(f, "bias {:+.4}", self.delta),
            MutationTarget::Synapse(i) => write!(f, "synapse[{}] {:+.4}", i, self.delta),
        }
    }
}

/// Computational unit: bias, activation and incoming synapses
#[derive(Clone, Debug, PartialEq)]
pub struct Neuron {
    pub bias: f64,
    pub activation: Activation,
    pub synapses: Vec<Synapse>,
    /// Pre-activation sum from the last forward pass
    pub inner_signal: f64,
    pub bias_correction: f64,
    pub bias_correction_momentum: f64,
}

impl Neuron {
    pub fn new(activation: Activation, bias: f64) -> Self {
        Self {
            bias,
            activation,
            synapses: Vec::new(),
            inner_signal: 0.0,
            bias_correction: 0.0,
            bias_correction_momentum: 0.0,
        }
    }

    pub fn connect(&mut self, source: UnitIndex, weight: f64) {
        self.synapses.push(Synapse::new(source, weight));
    }

    /// Compute `activation(bias + sum(weight * source signal))`
    #[inline]
    pub fn forward(&mut self, signals: &[f64]) -> f64 {
        let sum: f64 = self
            .synapses
            .iter()
            .map(|s| s.weight * signals[s.source.0])
            .sum();
        self.inner_signal = self.bias + sum;
        self.activation.activate(self.inner_signal)
    }

    /// One backward step for this neuron.
    ///
    /// `correction_signal` is the error this neuron received from its
    /// consumers. Corrections are accumulated into the bias and every
    /// synapse, and `correction * weight` is added to each source's entry in
    /// `corrections`. Returns the sum of absolute corrections produced.
    pub fn backward(
        &mut self,
        correction_signal: f64,
        signals: &[f64],
        corrections: &mut [f64],
        slippy: bool,
    ) -> f64 {
        if correction_signal == 0.0 {
            return 0.0;
        }

        let derivative = if slippy {
            self.activation
                .slippy_derivative(self.inner_signal, correction_signal)
        } else {
            self.activation.derivative(self.inner_signal)
        };
        let inner_correction = derivative * correction_signal;

        self.bias_correction += inner_correction;
        let mut produced = inner_correction.abs();

        for synapse in &mut self.synapses {
            let source = synapse.source.0;
            let correction = inner_correction * signals[source];
            synapse.correction += correction;
            corrections[source] += inner_correction * synapse.weight;
            produced += correction.abs();
        }

        produced
    }

    /// Gradient step with momentum on the bias and every weight
    pub fn adapt(&mut self, rate: f64, momentum: f64) {
        self.bias_correction_momentum =
            -rate * self.bias_correction + momentum * self.bias_correction_momentum;
        self.bias += self.bias_correction_momentum;
        self.bias_correction = 0.0;

        for synapse in &mut self.synapses {
            synapse.correction_momentum =
                -rate * synapse.correction + momentum * synapse.correction_momentum;
            synapse.weight += synapse.correction_momentum;
            synapse.correction = 0.0;
        }
    }

    /// Clear accumulated corrections, keeping momentum
    pub fn reset_corrections(&mut self) {
        self.bias_correction = 0.0;
        for synapse in &mut self.synapses {
            synapse.correction = 0.0;
        }
    }

    /// Mutate exactly one scalar: a synapse weight or the bias, uniformly
    pub fn mutate_one_weight<R: Rng + ?Sized>(
        &mut self,
        mutation: &Mutation,
        rng: &mut R,
    ) -> WeightMutation {
        let pick = rng.gen_range(0..=self.synapses.len());

        match self.synapses.get_mut(pick) {
            Some(synapse) => WeightMutation {
                target: MutationTarget::Synapse(pick),
                delta: mutation.mutate_weight(&mut synapse.weight, rng),
            },
            None => WeightMutation {
                target: MutationTarget::Bias,
                delta: mutation.mutate_bias(&mut self.bias, rng),
            },
        }
    }

    /// Check all parameters are finite
    pub fn is_valid(&self) -> bool {
        self.bias.is_finite() && self.synapses.iter().all(|s| s.weight.is_finite())
    }
}

/// Arena slot kind
#[derive(Clone, Debug, PartialEq)]
pub enum UnitKind {
    /// Plain signal emitter, value assigned from outside
    Input,
    Neuron(Neuron),
}

/// One arena slot: a unique id plus its kind
#[derive(Clone, Debug, PartialEq)]
pub struct Unit {
    pub id: String,
    pub kind: UnitKind,
}

impl Unit {
    pub fn input(id: String) -> Self {
        Self {
            id,
            kind: UnitKind::Input,
        }
    }

    pub fn neuron(id: String, neuron: Neuron) -> Self {
        Self {
            id,
            kind: UnitKind::Neuron(neuron),
        }
    }

    pub fn is_input(&self) -> bool {
        matches!(self.kind, UnitKind::Input)
    }

    pub fn as_neuron(&self) -> Option<&Neuron> {
        match &self.kind {
            UnitKind::Neuron(n) => Some(n),
            UnitKind::Input => None,
        }
    }

    pub fn as_neuron_mut(&mut self) -> Option<&mut Neuron> {
        match &mut self.kind {
            UnitKind::Neuron(n) => Some(n),
            UnitKind::Input => None,
        }
    }
}
