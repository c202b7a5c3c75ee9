//! # geneless
//!
//! Small feed-forward neural networks plus a population trainer that evolves
//! them without gene encodings.
//!
//! ## Features
//!
//! - **Graph engine**: arena-backed units, topological ordering with cycle
//!   detection, hand-written backward pass
//! - **Training**: gradient descent with momentum, stochastic and batch regimes
//! - **Evolution**: direct and versus trials, immunity, elite round-robin
//!   repopulation
//! - **Configurable**: YAML configuration files
//! - **Reproducible**: Seeded random number generation
//!
//! ## Quick Start
//!
//! ```rust
//! use geneless::neural::{Activation, Model, Sample};
//! use geneless::config::TrainingConfig;
//! use geneless::Mutation;
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! let mut rng = ChaCha8Rng::seed_from_u64(1);
//! let mut network = Model::new(&["a", "b"], &["out"])
//!     .hidden_layer(4, Activation::Tanh)
//!     .output_activation(Activation::Sigmoid)
//!     .build(&Mutation::default(), &mut rng)
//!     .unwrap();
//!
//! let samples = vec![
//!     Sample::new(vec![0.0, 0.0], vec![0.0]),
//!     Sample::new(vec![1.0, 1.0], vec![1.0]),
//! ];
//! let report = network
//!     .train_stochastic(&samples, &TrainingConfig::default(), &mut rng)
//!     .unwrap();
//! println!("converged: {} after {} epochs", report.converged, report.epochs);
//! ```
//!
//! ## Evolution
//!
//! ```rust,no_run
//! use geneless::{Config, Evolution};
//! use geneless::neural::{Activation, Model};
//!
//! let config = Config::default();
//! let model = Model::new(&["x"], &["y"]).output_activation(Activation::Identity);
//!
//! let mut evolution = Evolution::from_config(&config)
//!     .with_creator(move |mutation, rng| model.build(mutation, rng))
//!     .with_sync_trial(|network| {
//!         network
//!             .process_slice(&[1.0])
//!             .map(|out| -(out[0] - 0.5).abs())
//!             .unwrap_or(f64::NEG_INFINITY)
//!     });
//!
//! let stats = futures::executor::block_on(evolution.run(100)).unwrap();
//! println!("{:?}", stats.map(|s| s.summary()));
//! ```
//!
//! ## Checkpoints
//!
//! ```rust,no_run
//! use geneless::{Config, Evolution};
//! use geneless::checkpoint::PopulationCheckpoint;
//!
//! let evolution = Evolution::from_config(&Config::default());
//! let checkpoint = evolution.create_checkpoint().unwrap();
//! checkpoint.save("population.bin").unwrap();
//!
//! let loaded = PopulationCheckpoint::load("population.bin").unwrap();
//! let mut restored = Evolution::from_config(&Config::default());
//! restored.restore_checkpoint(&loaded).unwrap();
//! ```

pub mod checkpoint;
pub mod config;
pub mod evolution;
pub mod mutation;
pub mod neural;
pub mod stats;

// Re-export main types
pub use config::Config;
pub use evolution::{Evolution, EvolutionError, Individual};
pub use mutation::Mutation;
pub use neural::{Network, NetworkError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
