//! Declarative description of a layered network.

use super::activation::Activation;
use super::network::{Network, NetworkError};
use super::unit::UnitIndex;
use crate::mutation::Mutation;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// One fully connected hidden layer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    pub size: usize,
    pub activation: Activation,
}

/// Named inputs, hidden layers and named outputs.
///
/// [`Model::build`] connects every layer fully to the previous one, drawing
/// fresh weights and biases from a [`Mutation`]. Hidden units are named
/// `<layer>.<position>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub inputs: Vec<String>,
    #[serde(default)]
    pub hidden: Vec<LayerSpec>,
    pub outputs: Vec<String>,
    #[serde(default)]
    pub output_activation: Activation,
    #[serde(default)]
    pub named_outputs: bool,
}

impl Model {
    pub fn new(inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            hidden: Vec::new(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            output_activation: Activation::default(),
            named_outputs: false,
        }
    }

    pub fn hidden_layer(mut self, size: usize, activation: Activation) -> Self {
        self.hidden.push(LayerSpec { size, activation });
        self
    }

    pub fn output_activation(mut self, activation: Activation) -> Self {
        self.output_activation = activation;
        self
    }

    pub fn named_outputs(mut self, named: bool) -> Self {
        self.named_outputs = named;
        self
    }

    /// Build and finalize the network
    pub fn build<R: Rng + ?Sized>(
        &self,
        mutation: &Mutation,
        rng: &mut R,
    ) -> Result<Network, NetworkError> {
        let mut network = Network::new().with_named_outputs(self.named_outputs);

        let mut previous: Vec<UnitIndex> = self
            .inputs
            .iter()
            .map(|name| network.add_input(name))
            .collect::<Result<_, _>>()?;

        for (layer, spec) in self.hidden.iter().enumerate() {
            let mut current = Vec::with_capacity(spec.size);
            for position in 0..spec.size {
                let name = format!("{}.{}", layer, position);
                let unit = network.add_hidden(&name, spec.activation, mutation.new_bias(rng))?;
                for &source in &previous {
                    network.connect(unit, source, mutation.new_weight(rng))?;
                }
                current.push(unit);
            }
            // An empty layer passes the previous one through
            if !current.is_empty() {
                previous = current;
            }
        }

        for name in &self.outputs {
            let unit = network.add_output(name, self.output_activation, mutation.new_bias(rng))?;
            for &source in &previous {
                network.connect(unit, source, mutation.new_weight(rng))?;
            }
        }

        network.finalize()?;
        Ok(network)
    }
}
