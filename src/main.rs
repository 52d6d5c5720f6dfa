//! Evoloop CLI - Run an evolutionary search from JSON configuration.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use evoloop::{
    evolution::{
        CommandEvaluator, EvolutionRun, RunError,
        bitstring::{BitString, onemax, random_seeder, standard_registry},
    },
    schema::{EvolutionConfig, StopConfig},
};

const DEFAULT_LENGTH: usize = 64;

fn main() -> ExitCode {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "--example" {
        print_example_config();
        return ExitCode::SUCCESS;
    }

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [length]", args[0]);
        eprintln!();
        eprintln!("Evolve bit strings from a JSON configuration.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to evolution configuration file");
        eprintln!("  length       Bit-string length (default: {DEFAULT_LENGTH})");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        return ExitCode::FAILURE;
    }

    let config_path = PathBuf::from(&args[1]);
    let length: usize = args
        .get(2)
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_LENGTH);

    let config = match EvolutionConfig::from_json_file(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error in {}: {e}", config_path.display());
            return ExitCode::FAILURE;
        }
    };

    for population in &config.populations {
        if !population.stop.is_bounded() {
            log::warn!(
                "Population {} has no stop condition; stop with Ctrl-C or the stop file",
                population.name
            );
        }
    }

    match run(config, length) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: EvolutionConfig, length: usize) -> Result<(), RunError> {
    println!("Evoloop");
    println!("=======");
    for population in &config.populations {
        println!(
            "Population {}: {:?}, mu={}, lambda={}, strategy {:?}",
            population.name,
            population.kind,
            population.mu,
            population.lambda,
            population.operators.strategy
        );
    }
    println!("Bit-string length: {length}");
    println!();

    let registry = standard_registry();
    let mut run: EvolutionRun<BitString> = match config.evaluation.command.clone() {
        Some(command) => {
            println!("Evaluator: {} {}", command.program, command.args.join(" "));
            EvolutionRun::new(config, registry, CommandEvaluator::new(&command))?
        }
        None => {
            println!("Evaluator: OneMax");
            EvolutionRun::new(config, registry, onemax)?
        }
    };
    println!("Seed: {}", run.seed());
    println!();

    let handle = run.stop_handle();
    if let Err(e) = ctrlc::set_handler(move || {
        if handle.request_stop() > 1 {
            eprintln!("Second interrupt, terminating");
            std::process::exit(130);
        }
        eprintln!("Interrupt received, stopping after the current generation");
    }) {
        log::warn!("Cannot install interrupt handler: {e}");
    }

    let start = Instant::now();
    let result = run.run_with_callback(&random_seeder(length), |report| {
        println!(
            "  {} gen {}: live={}, new={}, clones={}, best={:?}, mean={:.3}, entropy={:.3}, sigma={:.2}, tau={:.2}",
            report.population,
            report.generation,
            report.live,
            report.new_children,
            report.clones,
            report.best_raw.as_ref().map(|f| f.values().to_vec()),
            report.mean_raw,
            report.entropy,
            report.sigma,
            report.tau
        );
    })?;

    println!();
    println!("Stopped: {:?}", result.stop_reason);
    if let Some(name) = &result.stopped_by {
        println!("Stopped by: {name}");
    }
    for summary in &result.populations {
        println!(
            "  {}: generation {}, {} evaluations, {} live",
            summary.name, summary.generation, summary.evaluations, summary.live
        );
        if let Some(best) = &summary.best {
            println!(
                "    best {} {:?}: {}",
                best.id,
                best.raw_fitness.values(),
                best.representation
            );
        }
    }
    println!("Time: {:.2}s", start.elapsed().as_secs_f64());
    Ok(())
}

fn print_example_config() {
    let mut config = EvolutionConfig::default();
    config.populations[0].stop = StopConfig {
        max_generations: Some(100),
        max_steady_state_generations: Some(20),
        ..Default::default()
    };
    config.random_seed = Some(42);

    match serde_json::to_string_pretty(&config) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Error serializing example: {e}"),
    }
}
