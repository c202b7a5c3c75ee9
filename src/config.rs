//! Configuration system for geneless runs.
//!
//! Supports YAML configuration files with sensible defaults. Every section
//! falls back to its defaults, so partial files load.

use crate::mutation::Mutation;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Errors raised while loading or validating a configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub evolution: EvolutionConfig,
    #[serde(default)]
    pub mutation: Mutation,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Gradient training configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    /// Epoch budget
    pub epochs: usize,
    /// Stop once the epoch average error is at or below this
    pub max_error: f64,
    /// Base adapt rate
    pub learning_rate: f64,
    /// Fraction of the previous step carried into the next
    pub momentum: f64,
    /// Shuffle samples every epoch
    pub shuffle: bool,
    /// Use the slippy derivative in the backward pass
    pub slippy: bool,
    /// Samples whose cost is below this are treated as converged
    pub converged_cost: f64,
    /// Relative improvement under which an epoch counts as stalled
    pub stall_threshold: f64,
    /// Rate boost added per consecutive stalled epoch
    pub stall_boost: f64,
    /// Upper bound of the stall boost factor
    pub max_stall_factor: f64,
}

/// Population and selection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: usize,
    /// Share of the population surviving selection
    pub selection_rate: f64,
    /// Share of the population used to seed offspring
    pub elite_rate: f64,
    /// Direct trials per individual per generation
    pub trial_count: usize,
    /// Versus rounds per generation
    pub trial_versus_count: usize,
    /// Opponents per versus match
    pub versus: usize,
    /// Immunity grants available at start
    pub immunity: usize,
    /// Seed for the population RNG, random when absent
    pub seed: Option<u64>,
}

/// Logging and checkpoint configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    pub log_level: String,
    /// Generations between stats lines
    pub stats_interval: u64,
    /// Generations between checkpoints
    pub checkpoint_interval: u64,
    /// Checkpoint files kept on disk
    pub max_checkpoints: usize,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 1000,
            max_error: 0.1,
            learning_rate: 0.1,
            momentum: 0.5,
            shuffle: true,
            slippy: true,
            converged_cost: 1e-6,
            stall_threshold: 0.01,
            stall_boost: 0.5,
            max_stall_factor: 4.0,
        }
    }
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 50,
            selection_rate: 0.3,
            elite_rate: 0.1,
            trial_count: 1,
            trial_versus_count: 0,
            versus: 1,
            immunity: 0,
            seed: None,
        }
    }
}

impl EvolutionConfig {
    /// Number of individuals used to seed offspring
    pub fn elite_count(&self) -> usize {
        (self.elite_rate * self.population_size as f64).floor() as usize
    }

    /// Number of individuals kept by selection, never below the elite count
    pub fn survivor_count(&self) -> usize {
        let survivors = (self.selection_rate * self.population_size as f64).floor() as usize;
        survivors.max(self.elite_count()).min(self.population_size)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            stats_interval: 10,
            checkpoint_interval: 50,
            max_checkpoints: 5,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let training = &self.training;
        if training.learning_rate <= 0.0 {
            return Err(ConfigError::Invalid(
                "training.learning_rate must be > 0".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&training.momentum) {
            return Err(ConfigError::Invalid(
                "training.momentum must be in [0, 1)".to_string(),
            ));
        }
        if training.max_stall_factor < 1.0 {
            return Err(ConfigError::Invalid(
                "training.max_stall_factor must be >= 1".to_string(),
            ));
        }

        let evolution = &self.evolution;
        if evolution.population_size == 0 {
            return Err(ConfigError::Invalid(
                "evolution.population_size must be > 0".to_string(),
            ));
        }
        for (name, rate) in [
            ("selection_rate", evolution.selection_rate),
            ("elite_rate", evolution.elite_rate),
        ] {
            if !(rate > 0.0 && rate <= 1.0) {
                return Err(ConfigError::Invalid(format!(
                    "evolution.{} must be in (0, 1]",
                    name
                )));
            }
        }
        if evolution.elite_count() == 0 {
            return Err(ConfigError::Invalid(
                "evolution.elite_rate * population_size must be at least 1".to_string(),
            ));
        }
        if evolution.trial_versus_count > 0 && evolution.versus >= evolution.population_size {
            return Err(ConfigError::Invalid(
                "evolution.versus must be smaller than population_size".to_string(),
            ));
        }

        self.mutation.validate().map_err(ConfigError::Invalid)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let loaded: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = "evolution:\n  population_size: 20\n  seed: 7\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.evolution.population_size, 20);
        assert_eq!(config.evolution.seed, Some(7));
        assert_eq!(config.evolution.selection_rate, 0.3);
        assert_eq!(config.training, TrainingConfig::default());
    }

    #[test]
    fn test_selection_counts() {
        let evolution = EvolutionConfig {
            population_size: 10,
            selection_rate: 0.3,
            elite_rate: 0.2,
            ..EvolutionConfig::default()
        };
        assert_eq!(evolution.elite_count(), 2);
        assert_eq!(evolution.survivor_count(), 3);

        let tiny = EvolutionConfig {
            population_size: 4,
            elite_rate: 0.1,
            ..EvolutionConfig::default()
        };
        assert_eq!(tiny.elite_count(), 0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = Config::default();
        config.evolution.elite_rate = 0.01;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.training.momentum = 1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.evolution.trial_versus_count = 2;
        config.evolution.versus = 50;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join("geneless_config_test.yaml");
        let mut config = Config::default();
        config.training.epochs = 42;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.training.epochs, 42);
        let _ = std::fs::remove_file(&path);
    }
}
