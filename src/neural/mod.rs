//! Neural network graph engine.
//!
//! Implements small feed-forward networks with:
//! - Arena-backed units and index synapses
//! - Topological ordering with cycle detection
//! - Hand-written backward pass with a slippy derivative variant
//! - Gradient descent with momentum, stochastic and batch regimes
//! - JSON persistence

pub mod activation;
pub mod data;
pub mod model;
pub mod network;
pub mod training;
pub mod unit;

pub use activation::{Activation, UnknownActivation};
pub use data::{DataError, NetworkData, SynapseData, UnitData};
pub use model::{LayerSpec, Model};
pub use network::{cost, error_delta, Lifecycle, Network, NetworkError, Signals};
pub use training::{Sample, TrainingReport};
pub use unit::{MutationTarget, Neuron, Role, Synapse, Unit, UnitIndex, UnitKind, WeightMutation};
