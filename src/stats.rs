//! Statistics tracking for evolution runs.
//!
//! Snapshots are read-only copies taken after scoring, for presentation
//! layers that must never touch the live population.

use crate::evolution::Individual;
use serde::{Deserialize, Serialize};

/// Statistics snapshot for one generation
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// Generation the scores belong to
    pub generation: u64,
    /// Population size at scoring time
    pub population: usize,
    pub best_score: f64,
    pub mean_score: f64,
    pub worst_score: f64,
    /// Individuals currently holding immunity
    pub immune_count: usize,
    /// Unit count of the best scoring network
    pub best_unit_count: usize,
    /// Bias plus weight count of the best scoring network
    pub best_parameter_count: usize,
}

impl GenerationStats {
    /// Create new empty stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot a scored population
    pub fn from_population(generation: u64, population: &[Individual]) -> Self {
        let mut stats = Self {
            generation,
            population: population.len(),
            ..Self::default()
        };
        if population.is_empty() {
            return stats;
        }

        let best = population.iter().max_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        if let Some(best) = best {
            stats.best_score = best.score;
            stats.best_unit_count = best.network.units().len();
            stats.best_parameter_count = best.network.parameter_count();
        }

        stats.worst_score = population
            .iter()
            .map(|i| i.score)
            .fold(f64::INFINITY, f64::min);
        stats.mean_score =
            population.iter().map(|i| i.score).sum::<f64>() / population.len() as f64;
        stats.immune_count = population.iter().filter(|i| i.immunity).count();
        stats
    }

    /// Format stats as a one-line summary
    pub fn summary(&self) -> String {
        format!(
            "Gen:{:5} | Pop:{:4} | Best:{:10.4} | Mean:{:10.4} | Worst:{:10.4} | Immune:{} | Units:{}",
            self.generation,
            self.population,
            self.best_score,
            self.mean_score,
            self.worst_score,
            self.immune_count,
            self.best_unit_count
        )
    }
}

/// Historical statistics tracker
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StatsHistory {
    /// All recorded stats snapshots
    pub snapshots: Vec<GenerationStats>,
}

impl StatsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a stats snapshot
    pub fn record(&mut self, stats: GenerationStats) {
        self.snapshots.push(stats);
    }

    pub fn latest(&self) -> Option<&GenerationStats> {
        self.snapshots.last()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Best score over generations
    pub fn best_series(&self) -> Vec<(u64, f64)> {
        self.snapshots
            .iter()
            .map(|s| (s.generation, s.best_score))
            .collect()
    }

    /// Mean score over generations
    pub fn mean_series(&self) -> Vec<(u64, f64)> {
        self.snapshots
            .iter()
            .map(|s| (s.generation, s.mean_score))
            .collect()
    }

    /// Save history to a JSON file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)
    }

    /// Load history from a JSON file
    pub fn load(path: &str) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(path)?;
        serde_json::from_str(&json)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::{Activation, Network};

    fn individual(score: f64, immunity: bool) -> Individual {
        let mut network = Network::new();
        let x = network.add_input("x").unwrap();
        let out = network.add_output("out", Activation::Identity, 0.0).unwrap();
        network.connect(out, x, 1.0).unwrap();
        Individual {
            network,
            score,
            immunity,
            generation: 0,
        }
    }

    #[test]
    fn test_stats_from_population() {
        let population = vec![
            individual(1.0, false),
            individual(4.0, true),
            individual(-2.0, false),
        ];

        let stats = GenerationStats::from_population(3, &population);

        assert_eq!(stats.generation, 3);
        assert_eq!(stats.population, 3);
        assert_eq!(stats.best_score, 4.0);
        assert_eq!(stats.worst_score, -2.0);
        assert_eq!(stats.mean_score, 1.0);
        assert_eq!(stats.immune_count, 1);
        assert_eq!(stats.best_unit_count, 2);
        assert_eq!(stats.best_parameter_count, 2);
        assert!(stats.summary().contains("Gen:    3"));
    }

    #[test]
    fn test_empty_population() {
        let stats = GenerationStats::from_population(1, &[]);
        assert_eq!(stats.population, 0);
        assert_eq!(stats.best_score, 0.0);
    }

    #[test]
    fn test_stats_history() {
        let mut history = StatsHistory::new();

        for i in 0..5u64 {
            history.record(GenerationStats {
                generation: i + 1,
                best_score: i as f64 * 2.0,
                ..GenerationStats::default()
            });
        }

        let series = history.best_series();
        assert_eq!(series.len(), 5);
        assert_eq!(series[0], (1, 0.0));
        assert_eq!(series[4], (5, 8.0));
        assert_eq!(history.latest().map(|s| s.generation), Some(5));
    }

    #[test]
    fn test_history_save_load() {
        let path = std::env::temp_dir().join("geneless_history_test.json");
        let path = path.to_string_lossy().to_string();
        let mut history = StatsHistory::new();
        history.record(GenerationStats {
            generation: 1,
            mean_score: 0.5,
            ..GenerationStats::default()
        });

        history.save(&path).unwrap();
        let loaded = StatsHistory::load(&path).unwrap();
        assert_eq!(loaded.snapshots, history.snapshots);
        let _ = std::fs::remove_file(&path);
    }
}
