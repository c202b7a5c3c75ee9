//! geneless - CLI Entry Point
//!
//! Trains and evolves small networks on the XOR task.

use clap::{Parser, Subcommand};
use geneless::checkpoint::{CheckpointManager, PopulationCheckpoint};
use geneless::neural::{Activation, Model, Network, Sample};
use geneless::{Config, Evolution};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[derive(Parser)]
#[command(name = "geneless")]
#[command(version)]
#[command(about = "Feed-forward networks trained by gradient descent or gene-less evolution")]
struct Cli {
    /// Configuration file (YAML); defaults are used if it does not exist
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate default configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "config.yaml")]
        output: PathBuf,
    },

    /// Train a XOR network with gradient descent
    Train {
        /// Hidden units (0 gives a single-layer network)
        #[arg(long, default_value = "3")]
        hidden: usize,

        /// Use the experimental batch regime
        #[arg(long)]
        batch: bool,

        /// Save the trained network as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Evolve a XOR population
    Evolve {
        /// Generations to run
        #[arg(short, long, default_value = "100")]
        generations: usize,

        /// Checkpoint directory; the latest checkpoint in it is resumed
        #[arg(long, default_value = "output")]
        checkpoint: PathBuf,

        /// Score by pairwise matches instead of direct trials
        #[arg(long)]
        versus: bool,

        /// Random seed for reproducibility
        #[arg(long)]
        seed: Option<u64>,

        /// Quiet mode (minimal output)
        #[arg(short, long)]
        quiet: bool,
    },

    /// Print a network file or a population checkpoint
    Inspect {
        /// Network JSON or checkpoint file
        path: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = if cli.config.exists() {
        Config::from_file(&cli.config)?
    } else {
        Config::default()
    };

    // Initialize logging
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.log_level.as_str()),
    )
    .init();

    match cli.command {
        Commands::Init { output } => generate_config(output),

        Commands::Train {
            hidden,
            batch,
            output,
            seed,
        } => train_xor(config, hidden, batch, output, seed),

        Commands::Evolve {
            generations,
            checkpoint,
            versus,
            seed,
            quiet,
        } => evolve_xor(config, generations, checkpoint, versus, seed, quiet),

        Commands::Inspect { path } => inspect(path),
    }
}

fn xor_samples() -> Vec<Sample> {
    [
        ([0.0, 0.0], 0.0),
        ([0.0, 1.0], 1.0),
        ([1.0, 0.0], 1.0),
        ([1.0, 1.0], 0.0),
    ]
    .iter()
    .map(|(inputs, expected)| Sample::new(inputs.to_vec(), vec![*expected]))
    .collect()
}

fn xor_model(hidden: usize) -> Model {
    let model = Model::new(&["a", "b"], &["xor"]).output_activation(Activation::HardSigmoid);
    if hidden > 0 {
        model.hidden_layer(hidden, Activation::Tanh)
    } else {
        model
    }
}

fn rng_from(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(s) => ChaCha8Rng::seed_from_u64(s),
        None => ChaCha8Rng::from_entropy(),
    }
}

fn generate_config(output: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    config.save(&output)?;
    println!("Configuration saved to: {:?}", output);
    Ok(())
}

fn train_xor(
    config: Config,
    hidden: usize,
    batch: bool,
    output: Option<PathBuf>,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut rng = rng_from(seed);
    let samples = xor_samples();
    let mut network = xor_model(hidden).build(&config.mutation, &mut rng)?;

    println!("Training XOR");
    println!("  Hidden units: {}", hidden);
    println!("  Regime: {}", if batch { "batch (experimental)" } else { "stochastic" });
    println!("  Epoch budget: {}", config.training.epochs);
    println!();

    let start = Instant::now();
    let report = if batch {
        network.train_batch(&samples, &config.training)?
    } else {
        network.train_stochastic(&samples, &config.training, &mut rng)?
    };

    println!("=== Training Complete ===");
    println!("Time: {:.3}s", start.elapsed().as_secs_f64());
    println!("Epochs: {}", report.epochs);
    println!("Average error: {:.5}", report.average_error);
    println!("Adapt rate: {:.4}", report.adapt_rate);
    println!("Converged: {}", report.converged);
    println!();

    for sample in &samples {
        let out = network.process_slice(&sample.inputs)?;
        println!("  {:?} -> {:.4} (expected {})", sample.inputs, out[0], sample.expected[0]);
    }

    if let Some(path) = output {
        network.save(&path)?;
        println!("Network saved to: {:?}", path);
    }
    Ok(())
}

/// Score of a network on XOR: the negated average error
fn xor_fitness(network: &mut Network, samples: &[Sample]) -> f64 {
    network
        .average_error(samples)
        .map(|error| -error)
        .unwrap_or(f64::NEG_INFINITY)
}

fn evolve_xor(
    mut config: Config,
    generations: usize,
    checkpoint_dir: PathBuf,
    versus: bool,
    seed: Option<u64>,
    quiet: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if seed.is_some() {
        config.evolution.seed = seed;
    }
    if versus && config.evolution.trial_versus_count == 0 {
        config.evolution.trial_versus_count = 1;
    }
    config.validate()?;

    let model = xor_model(2);
    let samples = xor_samples();
    let mut evolution = Evolution::from_config(&config)
        .with_creator(move |mutation, rng| model.build(mutation, rng));

    evolution = if versus {
        let samples = samples.clone();
        evolution.with_sync_versus(move |participants| {
            // One point per opponent with a strictly lower error
            let fitness: Vec<f64> = participants
                .iter_mut()
                .map(|network| xor_fitness(network, &samples))
                .collect();
            fitness
                .iter()
                .map(|mine| fitness.iter().filter(|other| mine > *other).count() as f64)
                .collect()
        })
    } else {
        let samples = samples.clone();
        evolution.with_sync_trial(move |network| xor_fitness(network, &samples))
    };

    let mut manager = CheckpointManager::new(
        &checkpoint_dir,
        config.logging.checkpoint_interval,
        config.logging.max_checkpoints,
    )?;
    match manager.find_latest() {
        Some(path) => {
            let checkpoint = PopulationCheckpoint::load(&path)?;
            evolution.restore_checkpoint(&checkpoint)?;
            println!("Resumed from {:?} at generation {}", path, evolution.generation());
        }
        None => println!("No checkpoint in {:?}, starting a fresh population", checkpoint_dir),
    }

    println!("Evolving XOR");
    println!("  Population: {}", config.evolution.population_size);
    println!("  Scoring: {}", if versus { "versus" } else { "direct" });
    println!("  Generations: {}", generations);
    println!();

    let start = Instant::now();
    let stats_interval = config.logging.stats_interval.max(1);

    for _ in 0..generations {
        let stats = futures::executor::block_on(evolution.run_generation())?;

        if !quiet && stats.generation % stats_interval == 0 {
            println!("{}", stats.summary());
        }

        if manager.should_save(evolution.generation()) {
            let checkpoint = evolution.create_checkpoint()?;
            match manager.save(&checkpoint) {
                Ok(path) => {
                    if !quiet {
                        println!("  Checkpoint saved: {:?}", path);
                    }
                }
                Err(e) => eprintln!("  Checkpoint error: {}", e),
            }
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("=== Evolution Complete ===");
    println!("Time: {:.2}s", elapsed.as_secs_f64());
    println!("Generation: {}", evolution.generation());

    let final_checkpoint = evolution.create_checkpoint()?;
    let final_path = checkpoint_dir.join("population_final.json");
    final_checkpoint.save(&final_path)?;
    println!("Final population: {:?}", final_path);

    let stats_path = checkpoint_dir.join("stats_history.json");
    evolution
        .history()
        .save(&stats_path.to_string_lossy())?;
    println!("Stats history: {:?}", stats_path);

    if let Some(best) = evolution.best() {
        let mut network = best.network.clone();
        println!();
        println!("Best individual (generation {}):", best.generation);
        for sample in &samples {
            let out = network.process_slice(&sample.inputs)?;
            println!("  {:?} -> {:.4}", sample.inputs, out[0]);
        }
    }
    Ok(())
}

fn inspect(path: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Inspect ===");
    println!("File: {:?}", path);
    println!();

    match Network::load(&path) {
        Ok(network) => {
            print!("{}", network);
            println!("Parameters: {}", network.parameter_count());
            Ok(())
        }
        Err(_) => inspect_checkpoint(&path),
    }
}

fn inspect_checkpoint(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let checkpoint = PopulationCheckpoint::load(path)?;

    println!("Generation: {}", checkpoint.generation);
    println!("Population: {}", checkpoint.networks.len());

    if let Some(first) = checkpoint.networks.first() {
        let network = first.to_network()?;
        println!();
        println!("Leading individual:");
        print!("{}", network);
    }

    println!();
    println!(
        "Checkpoint size: {:.2} KB",
        checkpoint.size_bytes() as f64 / 1_000.0
    );
    Ok(())
}
