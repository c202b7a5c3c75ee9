//! Canonical serialized form of a network.
//!
//! Units are stored in processing order, so every synapse source refers to
//! an input or to a unit listed earlier. Loading walks the list once and
//! fails on the first unknown reference.

use super::activation::{Activation, UnknownActivation};
use super::network::{Network, NetworkError};
use super::unit::{Role, UnitIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Errors raised while reading a serialized network
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error(transparent)]
    UnknownActivation(#[from] UnknownActivation),

    #[error("unit {unit} references unknown source {reference}")]
    UnknownSource { unit: String, reference: String },

    #[error("invalid unit id: {0}")]
    InvalidId(String),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SynapseData {
    pub source: String,
    pub weight: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UnitData {
    pub id: String,
    pub activation: String,
    pub bias: f64,
    pub synapses: Vec<SynapseData>,
}

/// Serialized network
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkData {
    /// Input ids in positional order
    pub inputs: Vec<String>,
    /// Hidden and output units in processing order
    pub units: Vec<UnitData>,
    /// Output ids in positional order
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub named_outputs: bool,
}

impl NetworkData {
    /// Capture a network. Fails if it cannot be ordered.
    pub fn from_network(network: &Network) -> Result<Self, NetworkError> {
        let order = network.compute_order()?;
        let units = network.units();

        let ids = |indices: &[UnitIndex]| -> Vec<String> {
            indices.iter().map(|index| units[index.0].id.clone()).collect()
        };
        let inputs = ids(network.inputs());
        let outputs = ids(network.outputs());

        let units = order
            .iter()
            .filter_map(|&index| {
                let unit = &units[index.0];
                unit.as_neuron().map(|neuron| UnitData {
                    id: unit.id.clone(),
                    activation: neuron.activation.identifier().to_string(),
                    bias: neuron.bias,
                    synapses: neuron
                        .synapses
                        .iter()
                        .map(|s| SynapseData {
                            source: units[s.source.0].id.clone(),
                            weight: s.weight,
                        })
                        .collect(),
                })
            })
            .collect();

        Ok(Self {
            inputs,
            units,
            outputs,
            named_outputs: network.named_outputs(),
        })
    }

    /// Rebuild a finalized network.
    ///
    /// Listed outputs are created first so they keep their positions. Outputs
    /// missing from `outputs` follow in processing order.
    pub fn to_network(&self) -> Result<Network, DataError> {
        let mut network = Network::new().with_named_outputs(self.named_outputs);
        let mut known: HashMap<&str, UnitIndex> = HashMap::new();

        for id in &self.inputs {
            match Role::split(id) {
                Some((Role::Input, name)) => {
                    known.insert(id.as_str(), network.add_input(name)?);
                }
                _ => return Err(DataError::InvalidId(id.clone())),
            }
        }

        let mut placed: HashMap<&str, UnitIndex> = HashMap::new();
        for id in &self.outputs {
            let data = self
                .units
                .iter()
                .find(|unit| unit.id == *id)
                .ok_or_else(|| DataError::InvalidId(id.clone()))?;
            let index = match Role::split(id) {
                Some((Role::Output, name)) => {
                    network.add_output(name, data.activation.parse()?, data.bias)?
                }
                _ => return Err(DataError::InvalidId(id.clone())),
            };
            placed.insert(id.as_str(), index);
        }

        for data in &self.units {
            let activation: Activation = data.activation.parse()?;
            let index = match (placed.get(data.id.as_str()), Role::split(&data.id)) {
                (Some(&index), _) => index,
                (None, Some((Role::Hidden, name))) => {
                    network.add_hidden(name, activation, data.bias)?
                }
                (None, Some((Role::Output, name))) => {
                    network.add_output(name, activation, data.bias)?
                }
                _ => return Err(DataError::InvalidId(data.id.clone())),
            };

            for synapse in &data.synapses {
                let source = known.get(synapse.source.as_str()).copied().ok_or_else(|| {
                    DataError::UnknownSource {
                        unit: data.id.clone(),
                        reference: synapse.source.clone(),
                    }
                })?;
                network.connect(index, source, synapse.weight)?;
            }
            known.insert(data.id.as_str(), index);
        }

        network.finalize()?;
        Ok(network)
    }

    pub fn to_json(&self) -> Result<String, DataError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, DataError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Network {
    /// Save the network as JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DataError> {
        let json = NetworkData::from_network(self)?.to_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load a network saved with [`Network::save`]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DataError> {
        let json = std::fs::read_to_string(path)?;
        NetworkData::from_json(&json)?.to_network()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::Mutation;
    use crate::neural::model::Model;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn sample_network() -> Network {
        Model::new(&["a", "b"], &["x", "y"])
            .hidden_layer(3, Activation::Tanh)
            .hidden_layer(2, Activation::LeakyRelu)
            .output_activation(Activation::Sigmoid)
            .build(&Mutation::default(), &mut ChaCha8Rng::seed_from_u64(17))
            .unwrap()
    }

    #[test]
    fn test_roundtrip_preserves_topology_and_outputs() {
        let mut original = sample_network();
        let data = NetworkData::from_network(&original).unwrap();
        let json = data.to_json().unwrap();

        let mut restored = NetworkData::from_json(&json).unwrap().to_network().unwrap();

        assert_eq!(NetworkData::from_network(&restored).unwrap(), data);
        let ids = |n: &Network| -> Vec<String> {
            n.ordered_units()
                .iter()
                .map(|i| n.units()[i.0].id.clone())
                .collect()
        };
        assert_eq!(ids(&original), ids(&restored));

        let input = [0.25, -0.75];
        assert_eq!(
            original.process_slice(&input).unwrap(),
            restored.process_slice(&input).unwrap()
        );
    }

    #[test]
    fn test_units_serialized_in_processing_order() {
        let data = NetworkData::from_network(&sample_network()).unwrap();
        let mut seen: Vec<&str> = data.inputs.iter().map(String::as_str).collect();
        for unit in &data.units {
            for synapse in &unit.synapses {
                assert!(seen.contains(&synapse.source.as_str()));
            }
            seen.push(&unit.id);
        }
    }

    #[test]
    fn test_unknown_source_fails() {
        let data = NetworkData {
            inputs: vec!["i:a".to_string()],
            units: vec![UnitData {
                id: "o:out".to_string(),
                activation: "sigmoid".to_string(),
                bias: 0.0,
                synapses: vec![SynapseData {
                    source: "h:ghost".to_string(),
                    weight: 1.0,
                }],
            }],
            outputs: vec![],
            named_outputs: false,
        };

        match data.to_network() {
            Err(DataError::UnknownSource { unit, reference }) => {
                assert_eq!(unit, "o:out");
                assert_eq!(reference, "h:ghost");
            }
            other => panic!("expected unknown source, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_unknown_activation_fails() {
        let data = NetworkData {
            inputs: vec![],
            units: vec![UnitData {
                id: "o:out".to_string(),
                activation: "swish".to_string(),
                bias: 0.0,
                synapses: vec![],
            }],
            outputs: vec!["o:out".to_string()],
            named_outputs: false,
        };
        assert!(matches!(
            data.to_network(),
            Err(DataError::UnknownActivation(_))
        ));
    }

    #[test]
    fn test_named_output_flag_defaults_off() {
        let json = r#"{"inputs":["i:a"],"units":[{"id":"o:b","activation":"identity","bias":0.5,"synapses":[{"source":"i:a","weight":2.0}]}]}"#;
        let mut network = NetworkData::from_json(json).unwrap().to_network().unwrap();

        assert!(!network.named_outputs());
        assert_eq!(network.process_slice(&[1.0]).unwrap(), vec![2.5]);
    }

    #[test]
    fn test_roundtrip_keeps_output_positions() {
        // o:b is processed before o:a because it feeds it
        let mut original = Network::new();
        let x = original.add_input("x").unwrap();
        let a = original.add_output("a", Activation::Identity, 0.0).unwrap();
        let b = original.add_output("b", Activation::Identity, 0.0).unwrap();
        original.connect(b, x, 1.0).unwrap();
        original.connect(a, b, 2.0).unwrap();

        let data = NetworkData::from_network(&original).unwrap();
        assert_eq!(data.outputs, vec!["o:a".to_string(), "o:b".to_string()]);
        assert_eq!(data.units[0].id, "o:b");

        let mut restored = data.to_network().unwrap();
        assert_eq!(original.process_slice(&[1.0]).unwrap(), vec![2.0, 1.0]);
        assert_eq!(restored.process_slice(&[1.0]).unwrap(), vec![2.0, 1.0]);
        assert_eq!(NetworkData::from_network(&restored).unwrap(), data);
    }

    #[test]
    fn test_listed_output_missing_from_units_fails() {
        let data = NetworkData {
            inputs: vec!["i:a".to_string()],
            units: vec![],
            outputs: vec!["o:gone".to_string()],
            named_outputs: false,
        };
        assert!(matches!(data.to_network(), Err(DataError::InvalidId(id)) if id == "o:gone"));
    }

    #[test]
    fn test_save_and_load_file() {
        let path = std::env::temp_dir().join("geneless_network_test.json");
        let mut original = sample_network();
        original.save(&path).unwrap();

        let mut loaded = Network::load(&path).unwrap();
        assert_eq!(
            original.process_slice(&[1.0, 0.0]).unwrap(),
            loaded.process_slice(&[1.0, 0.0]).unwrap()
        );
        let _ = std::fs::remove_file(&path);
    }
}
