//! Evolution mechanics: scoring, selection and repopulation.
//!
//! One generation walks `Idle -> Scoring -> Selecting -> Repopulating -> Idle`.
//! Trials are awaited one after another on the calling task. Scores are
//! plain sums, so the order trials complete in never matters.

use crate::checkpoint::PopulationCheckpoint;
use crate::config::{Config, EvolutionConfig};
use crate::mutation::Mutation;
use crate::neural::{DataError, Network, NetworkData, NetworkError};
use crate::stats::{GenerationStats, StatsHistory};
use futures::future::LocalBoxFuture;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;

/// Scores one network
pub type TrialFn = Box<dyn for<'a> FnMut(&'a mut Network) -> LocalBoxFuture<'a, f64>>;

/// Scores a match-up; returns one score per participant, in order
pub type VersusFn = Box<dyn for<'a> FnMut(&'a mut [Network]) -> LocalBoxFuture<'a, Vec<f64>>>;

/// Creates a fresh individual
pub type CreateFn = Box<dyn FnMut(&Mutation, &mut ChaCha8Rng) -> Result<Network, NetworkError>>;

/// Configuration and scoring failures of the generation loop
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvolutionError {
    #[error("population needs growing but no creator is configured")]
    MissingCreator,

    #[error("elite count is zero (elite_rate {elite_rate} * population_size {population_size})")]
    ZeroEliteCount {
        elite_rate: f64,
        population_size: usize,
    },

    #[error("versus needs {needed} distinct individuals, population has {available}")]
    TooFewForVersus { needed: usize, available: usize },

    #[error("versus trial returned {found} scores for {expected} participants")]
    ScoreCountMismatch { expected: usize, found: usize },

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// A network plus its selection metadata
#[derive(Clone, Debug)]
pub struct Individual {
    pub network: Network,
    pub score: f64,
    /// Immune individuals sort ahead of everyone else
    pub immunity: bool,
    /// Generation the individual was created in
    pub generation: u64,
}

impl Individual {
    pub fn new(network: Network, generation: u64) -> Self {
        Self {
            network,
            score: 0.0,
            immunity: false,
            generation,
        }
    }
}

/// Generation loop state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Scoring,
    Selecting,
    Repopulating,
}

/// Population manager
pub struct Evolution {
    config: EvolutionConfig,
    mutation: Mutation,
    population: Vec<Individual>,
    generation: u64,
    immunity_budget: usize,
    revoke_requested: bool,
    phase: Phase,
    rng: ChaCha8Rng,
    creator: Option<CreateFn>,
    trial: Option<TrialFn>,
    versus: Option<VersusFn>,
    history: StatsHistory,
}

impl Evolution {
    pub fn new(config: EvolutionConfig, mutation: Mutation) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            immunity_budget: config.immunity,
            config,
            mutation,
            population: Vec::new(),
            generation: 0,
            revoke_requested: false,
            phase: Phase::Idle,
            rng,
            creator: None,
            trial: None,
            versus: None,
            history: StatsHistory::new(),
        }
    }

    /// Create evolution engine from config
    pub fn from_config(config: &Config) -> Self {
        Self::new(config.evolution.clone(), config.mutation.clone())
    }

    pub fn with_creator<F>(mut self, creator: F) -> Self
    where
        F: FnMut(&Mutation, &mut ChaCha8Rng) -> Result<Network, NetworkError> + 'static,
    {
        self.creator = Some(Box::new(creator));
        self
    }

    /// Direct trial, awaited `trial_count` times per individual
    pub fn with_trial<F>(mut self, trial: F) -> Self
    where
        F: for<'a> FnMut(&'a mut Network) -> LocalBoxFuture<'a, f64> + 'static,
    {
        self.trial = Some(Box::new(trial));
        self
    }

    /// Direct trial from a plain closure
    pub fn with_sync_trial<F>(self, mut trial: F) -> Self
    where
        F: FnMut(&mut Network) -> f64 + 'static,
    {
        self.with_trial(move |network| {
            let score = trial(network);
            Box::pin(futures::future::ready(score))
        })
    }

    /// Versus trial over `versus + 1` participants
    pub fn with_versus<F>(mut self, versus: F) -> Self
    where
        F: for<'a> FnMut(&'a mut [Network]) -> LocalBoxFuture<'a, Vec<f64>> + 'static,
    {
        self.versus = Some(Box::new(versus));
        self
    }

    /// Versus trial from a plain closure
    pub fn with_sync_versus<F>(self, mut versus: F) -> Self
    where
        F: FnMut(&mut [Network]) -> Vec<f64> + 'static,
    {
        self.with_versus(move |participants| {
            let scores = versus(participants);
            Box::pin(futures::future::ready(scores))
        })
    }

    /// Replace the population, e.g. from a checkpoint
    pub fn with_population(mut self, networks: Vec<Network>, generation: u64) -> Self {
        self.set_population(networks, generation);
        self
    }

    fn set_population(&mut self, networks: Vec<Network>, generation: u64) {
        if networks.len() < self.config.population_size {
            log::warn!(
                "population of {} loaded, {} configured; the rest will be created",
                networks.len(),
                self.config.population_size
            );
        }
        self.population = networks
            .into_iter()
            .map(|network| Individual::new(network, generation))
            .collect();
        self.generation = generation;
    }

    /// Grow the population to its configured size with fresh individuals
    pub fn populate(&mut self) -> Result<(), EvolutionError> {
        if self.population.len() >= self.config.population_size {
            return Ok(());
        }
        let creator = self
            .creator
            .as_mut()
            .ok_or(EvolutionError::MissingCreator)?;

        while self.population.len() < self.config.population_size {
            let network = creator(&self.mutation, &mut self.rng)?;
            self.population
                .push(Individual::new(network, self.generation));
        }
        Ok(())
    }

    // ---- accessors ---------------------------------------------------------

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn population(&self) -> &[Individual] {
        &self.population
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    pub fn history(&self) -> &StatsHistory {
        &self.history
    }

    pub fn immunity_budget(&self) -> usize {
        self.immunity_budget
    }

    /// Leading survivor of the last selection
    pub fn best(&self) -> Option<&Individual> {
        self.population.first()
    }

    /// Allow `count` more selections to grant immunity
    pub fn grant_immunity(&mut self, count: usize) {
        self.immunity_budget += count;
    }

    /// Strip immunity from the top survivor at the next selection
    pub fn revoke_immunity(&mut self) {
        self.revoke_requested = true;
    }

    // ---- generation loop ---------------------------------------------------

    /// Run generations back to back, returning the last snapshot
    pub async fn run(&mut self, generations: usize) -> Result<Option<GenerationStats>, EvolutionError> {
        let mut last = None;
        for _ in 0..generations {
            last = Some(self.run_generation().await?);
        }
        Ok(last)
    }

    /// Score, select and repopulate once.
    ///
    /// Returns the snapshot taken right after scoring.
    pub async fn run_generation(&mut self) -> Result<GenerationStats, EvolutionError> {
        let result = self.step().await;
        self.phase = Phase::Idle;
        result
    }

    async fn step(&mut self) -> Result<GenerationStats, EvolutionError> {
        let elite = self.config.elite_count();
        if elite == 0 {
            return Err(EvolutionError::ZeroEliteCount {
                elite_rate: self.config.elite_rate,
                population_size: self.config.population_size,
            });
        }
        self.populate()?;
        self.check_versus()?;

        self.generation += 1;

        self.phase = Phase::Scoring;
        if let Err(e) = self.score().await {
            // The generation never completed
            self.generation -= 1;
            return Err(e);
        }
        let stats = GenerationStats::from_population(self.generation, &self.population);
        log::debug!("{}", stats.summary());
        self.history.record(stats.clone());

        self.phase = Phase::Selecting;
        self.select();

        self.phase = Phase::Repopulating;
        self.repopulate(elite);

        Ok(stats)
    }

    fn check_versus(&self) -> Result<(), EvolutionError> {
        if self.versus.is_none() || self.config.trial_versus_count == 0 {
            return Ok(());
        }
        let needed = self.config.versus + 1;
        if needed > self.population.len() {
            return Err(EvolutionError::TooFewForVersus {
                needed,
                available: self.population.len(),
            });
        }
        Ok(())
    }

    async fn score(&mut self) -> Result<(), EvolutionError> {
        for individual in &mut self.population {
            individual.score = 0.0;
        }

        if let Some(trial) = self.trial.as_mut() {
            for individual in &mut self.population {
                for _ in 0..self.config.trial_count {
                    individual.score += trial(&mut individual.network).await;
                }
            }
        }

        if self.config.trial_versus_count > 0 {
            if let Some(versus) = self.versus.as_mut() {
                score_versus(
                    versus,
                    &mut self.population,
                    &self.config,
                    &mut self.rng,
                )
                .await?;
            }
        }
        Ok(())
    }

    /// Immune first, then by descending score; keep the survivors
    fn select(&mut self) {
        sort_for_selection(&mut self.population);
        self.population.truncate(self.config.survivor_count());

        if let Some(top) = self.population.first_mut() {
            if self.revoke_requested {
                top.immunity = false;
                self.revoke_requested = false;
            } else if self.immunity_budget > 0 {
                top.immunity = true;
                self.immunity_budget -= 1;
            }
        }
    }

    /// Clone and mutate elites round robin until the population is full
    fn repopulate(&mut self, elite: usize) {
        let elite = elite.min(self.population.len());
        if elite == 0 {
            return;
        }

        let mut cursor = 0;
        while self.population.len() < self.config.population_size {
            let mut network = self.population[cursor].network.clone();
            if let Some((index, record)) = network.mutate_one_weight(&self.mutation, &mut self.rng) {
                log::debug!(
                    "offspring of elite {}: {} on {}",
                    cursor,
                    record,
                    network.units()[index.0].id
                );
            }
            self.population
                .push(Individual::new(network, self.generation));
            cursor = (cursor + 1) % elite;
        }
    }

    // ---- persistence -------------------------------------------------------

    /// Snapshot the generation counter and every network
    pub fn create_checkpoint(&self) -> Result<PopulationCheckpoint, NetworkError> {
        let networks = self
            .population
            .iter()
            .map(|individual| NetworkData::from_network(&individual.network))
            .collect::<Result<_, _>>()?;
        Ok(PopulationCheckpoint::new(self.generation, networks))
    }

    /// Replace the population with a checkpoint's networks
    pub fn restore_checkpoint(&mut self, checkpoint: &PopulationCheckpoint) -> Result<(), DataError> {
        let networks = checkpoint
            .networks
            .iter()
            .map(NetworkData::to_network)
            .collect::<Result<Vec<_>, _>>()?;
        self.set_population(networks, checkpoint.generation);
        log::info!(
            "restored {} individuals at generation {}",
            self.population.len(),
            self.generation
        );
        Ok(())
    }
}

fn sort_for_selection(population: &mut [Individual]) {
    population.sort_by(|a, b| {
        b.immunity.cmp(&a.immunity).then_with(|| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
        })
    });
}

/// Versus rounds.
///
/// `versus + 1` distinct offsets are drawn once. In every round each index
/// `i` seeds a match between `(i + offset + round_offset) % n` for every
/// offset, so each individual plays exactly once per offset slot per round.
/// The round offset then advances by an increment drawn from `[1, n - 2]`.
async fn score_versus(
    versus: &mut VersusFn,
    population: &mut [Individual],
    config: &EvolutionConfig,
    rng: &mut ChaCha8Rng,
) -> Result<(), EvolutionError> {
    let n = population.len();
    let slots = config.versus + 1;
    let offsets = rand::seq::index::sample(rng, n, slots).into_vec();
    let increment = if n > 2 { rng.gen_range(1..=n - 2) } else { 1 };
    let mut round_offset = 0;

    for _ in 0..config.trial_versus_count {
        for i in 0..n {
            let members: Vec<usize> = offsets
                .iter()
                .map(|offset| (i + offset + round_offset) % n)
                .collect();

            let mut participants: Vec<Network> = members
                .iter()
                .map(|&m| std::mem::take(&mut population[m].network))
                .collect();
            let scores = versus(participants.as_mut_slice()).await;
            for (&m, network) in members.iter().zip(participants) {
                population[m].network = network;
            }

            if scores.len() != members.len() {
                return Err(EvolutionError::ScoreCountMismatch {
                    expected: members.len(),
                    found: scores.len(),
                });
            }
            for (&m, score) in members.iter().zip(scores) {
                population[m].score += score;
            }
        }
        round_offset = (round_offset + increment) % n;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neural::{Activation, Model};
    use futures::executor::block_on;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::rc::Rc;

    fn config(population_size: usize) -> EvolutionConfig {
        EvolutionConfig {
            population_size,
            selection_rate: 0.5,
            elite_rate: 0.2,
            seed: Some(42),
            ..EvolutionConfig::default()
        }
    }

    fn creator(mutation: &Mutation, rng: &mut ChaCha8Rng) -> Result<Network, NetworkError> {
        Model::new(&["x"], &["y"])
            .output_activation(Activation::Identity)
            .build(mutation, rng)
    }

    /// Networks tagged by their output bias
    fn tagged_creator() -> impl FnMut(&Mutation, &mut ChaCha8Rng) -> Result<Network, NetworkError> {
        let mut next = 0.0;
        move |_, _| {
            let mut network = Network::new();
            let x = network.add_input("x")?;
            let out = network.add_output("y", Activation::Identity, next)?;
            network.connect(out, x, 0.0)?;
            next += 1.0;
            Ok(network)
        }
    }

    fn tag(network: &Network) -> i64 {
        network
            .neuron(network.outputs()[0])
            .map(|n| n.bias as i64)
            .unwrap_or(-1)
    }

    fn individual(score: f64, immunity: bool) -> Individual {
        Individual {
            network: Network::new(),
            score,
            immunity,
            generation: 0,
        }
    }

    #[test]
    fn test_immune_individual_sorts_first() {
        let mut population = vec![
            individual(10.0, false),
            individual(1.0, true),
            individual(5.0, false),
        ];
        sort_for_selection(&mut population);

        assert!(population[0].immunity);
        assert_eq!(population[0].score, 1.0);
        assert_eq!(population[1].score, 10.0);
        assert_eq!(population[2].score, 5.0);
    }

    #[test]
    fn test_first_generation_is_one() {
        let mut evolution = Evolution::new(config(10), Mutation::default())
            .with_creator(creator)
            .with_sync_trial(|_| 1.0);

        let stats = block_on(evolution.run_generation()).unwrap();
        assert_eq!(stats.generation, 1);
        assert_eq!(evolution.generation(), 1);
        assert_eq!(evolution.population().len(), 10);
        assert_eq!(evolution.phase(), Phase::Idle);
        assert_eq!(stats.mean_score, 1.0);
    }

    #[test]
    fn test_missing_creator() {
        let mut evolution = Evolution::new(config(10), Mutation::default());
        assert_eq!(
            block_on(evolution.run_generation()).unwrap_err(),
            EvolutionError::MissingCreator
        );
        assert_eq!(evolution.generation(), 0);
    }

    #[test]
    fn test_zero_elite_count_is_reported() {
        let cfg = EvolutionConfig {
            elite_rate: 0.05,
            ..config(10)
        };
        let mut evolution = Evolution::new(cfg, Mutation::default()).with_creator(creator);

        assert!(matches!(
            block_on(evolution.run_generation()),
            Err(EvolutionError::ZeroEliteCount { .. })
        ));
    }

    #[test]
    fn test_trial_count_sums_scores() {
        let cfg = EvolutionConfig {
            trial_count: 3,
            ..config(5)
        };
        let mut evolution = Evolution::new(cfg, Mutation::default())
            .with_creator(creator)
            .with_trial(|network| {
                Box::pin(async move { network.process_slice(&[0.0]).map(|_| 2.0).unwrap_or(0.0) })
            });

        let stats = block_on(evolution.run_generation()).unwrap();
        assert_eq!(stats.best_score, 6.0);
        assert_eq!(stats.worst_score, 6.0);
    }

    #[test]
    fn test_no_trial_keeps_scores_zero() {
        let mut evolution = Evolution::new(config(10), Mutation::default()).with_creator(creator);
        let stats = block_on(evolution.run_generation()).unwrap();
        assert_eq!(stats.best_score, 0.0);
        assert_eq!(stats.worst_score, 0.0);
    }

    #[test]
    fn test_versus_round_robin_is_fair() {
        let counts: Rc<RefCell<HashMap<i64, usize>>> = Rc::default();
        let leads: Rc<RefCell<HashMap<i64, usize>>> = Rc::default();
        let seeded = Rc::new(RefCell::new(0usize));
        let cfg = EvolutionConfig {
            trial_versus_count: 4,
            versus: 1,
            ..config(10)
        };

        let counter = Rc::clone(&counts);
        let leader = Rc::clone(&leads);
        let matches = Rc::clone(&seeded);
        let mut evolution = Evolution::new(cfg, Mutation::default())
            .with_creator(tagged_creator())
            .with_sync_versus(move |participants| {
                *matches.borrow_mut() += 1;
                *leader.borrow_mut().entry(tag(&participants[0])).or_default() += 1;
                for network in participants.iter() {
                    *counter.borrow_mut().entry(tag(network)).or_default() += 1;
                }
                vec![1.0; participants.len()]
            });

        let stats = block_on(evolution.run_generation()).unwrap();

        // Every index seeds one match per round
        assert_eq!(*seeded.borrow(), 4 * 10);
        // and fills the first slot of exactly trial_versus_count matches
        let leads = leads.borrow();
        assert_eq!(leads.len(), 10);
        for count in leads.values() {
            assert_eq!(*count, 4);
        }

        // versus + 1 slots per match
        let counts = counts.borrow();
        assert_eq!(counts.len(), 10);
        for count in counts.values() {
            assert_eq!(*count, 2 * 4);
        }
        assert_eq!(stats.best_score, stats.worst_score);
    }

    #[test]
    fn test_versus_participants_are_distinct() {
        let cfg = EvolutionConfig {
            trial_versus_count: 3,
            versus: 3,
            ..config(5)
        };
        let mut evolution = Evolution::new(cfg, Mutation::default())
            .with_creator(tagged_creator())
            .with_sync_versus(|participants| {
                let mut tags: Vec<i64> = participants.iter().map(tag).collect();
                tags.sort();
                tags.dedup();
                assert_eq!(tags.len(), 4);
                vec![0.0; participants.len()]
            });

        block_on(evolution.run_generation()).unwrap();
    }

    #[test]
    fn test_versus_needs_enough_individuals() {
        let cfg = EvolutionConfig {
            trial_versus_count: 1,
            versus: 5,
            elite_rate: 0.5,
            ..config(4)
        };
        let mut evolution = Evolution::new(cfg, Mutation::default())
            .with_creator(creator)
            .with_sync_versus(|p| vec![0.0; p.len()]);

        assert_eq!(
            block_on(evolution.run_generation()).unwrap_err(),
            EvolutionError::TooFewForVersus {
                needed: 6,
                available: 4
            }
        );
    }

    #[test]
    fn test_versus_score_count_is_checked() {
        let cfg = EvolutionConfig {
            trial_versus_count: 1,
            ..config(5)
        };
        let mut evolution = Evolution::new(cfg, Mutation::default())
            .with_creator(creator)
            .with_sync_versus(|_| vec![1.0]);

        assert_eq!(
            block_on(evolution.run_generation()).unwrap_err(),
            EvolutionError::ScoreCountMismatch {
                expected: 2,
                found: 1
            }
        );
        assert_eq!(evolution.phase(), Phase::Idle);
        assert_eq!(evolution.generation(), 0);
        assert!(evolution.history().is_empty());
        assert!(evolution.population().iter().all(|i| i.network.units().len() == 2));
    }

    #[test]
    fn test_repopulation_is_round_robin() {
        let mutation = Mutation {
            bias_delta: 0.0,
            weight_delta: 0.0,
            ..Mutation::default()
        };
        let cfg = EvolutionConfig {
            selection_rate: 0.3,
            elite_rate: 0.2,
            ..config(10)
        };
        let mut evolution = Evolution::new(cfg, mutation)
            .with_creator(tagged_creator())
            .with_sync_trial(|network| tag(network) as f64);

        block_on(evolution.run_generation()).unwrap();

        // Survivors 9, 8, 7; elites 9 and 8 alternate
        let tags: Vec<i64> = evolution
            .population()
            .iter()
            .map(|i| tag(&i.network))
            .collect();
        assert_eq!(tags, vec![9, 8, 7, 9, 8, 9, 8, 9, 8, 9]);
        assert!(evolution.population()[3..]
            .iter()
            .all(|i| i.generation == 1));
    }

    #[test]
    fn test_immunity_budget() {
        let cfg = EvolutionConfig {
            immunity: 1,
            ..config(10)
        };
        let mut evolution = Evolution::new(cfg, Mutation::default())
            .with_creator(tagged_creator())
            .with_sync_trial(|network| tag(network) as f64);

        block_on(evolution.run_generation()).unwrap();
        assert!(evolution.population()[0].immunity);
        assert_eq!(evolution.immunity_budget(), 0);

        evolution.revoke_immunity();
        block_on(evolution.run_generation()).unwrap();
        assert!(evolution.population().iter().all(|i| !i.immunity));
    }

    #[test]
    fn test_best_score_never_drops() {
        let mut evolution = Evolution::new(config(20), Mutation::default())
            .with_creator(creator)
            .with_sync_trial(|network| {
                network
                    .process_slice(&[1.0])
                    .map(|out| -(out[0] - 3.0).abs())
                    .unwrap_or(f64::NEG_INFINITY)
            });

        block_on(evolution.run(15)).unwrap();

        let series = evolution.history().best_series();
        assert_eq!(series.len(), 15);
        for pair in series.windows(2) {
            assert!(pair[1].1 >= pair[0].1);
        }
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let run = || {
            let mut evolution = Evolution::new(config(12), Mutation::default())
                .with_creator(creator)
                .with_sync_trial(|network| {
                    network.process_slice(&[0.5]).map(|o| o[0]).unwrap_or(0.0)
                });
            block_on(evolution.run(5)).unwrap();
            evolution.history().best_series()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_checkpoint_restore() {
        let mut evolution = Evolution::new(config(6), Mutation::default())
            .with_creator(creator)
            .with_sync_trial(|_| 0.0);
        block_on(evolution.run(2)).unwrap();

        let checkpoint = evolution.create_checkpoint().unwrap();
        assert_eq!(checkpoint.generation, 2);
        assert_eq!(checkpoint.networks.len(), 6);

        let mut restored = Evolution::new(config(6), Mutation::default());
        restored.restore_checkpoint(&checkpoint).unwrap();
        assert_eq!(restored.generation(), 2);
        assert_eq!(restored.population().len(), 6);

        // A full restored population needs no creator
        let stats = block_on(restored.run_generation()).unwrap();
        assert_eq!(stats.generation, 3);
    }
}
