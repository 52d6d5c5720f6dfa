//! Quick OneMax performance test

use evoloop::{
    EvolutionConfig, EvolutionRun,
    evolution::bitstring::{BitString, onemax, random_seeder, standard_registry},
    schema::{PopulationConfig, RunConfig, SelectionStrategy, StopConfig},
};
use std::time::Instant;

fn config(length: usize, mu: usize, lambda: usize, strategy: SelectionStrategy) -> EvolutionConfig {
    let mut population = PopulationConfig {
        mu,
        lambda,
        nu: mu,
        stop: StopConfig {
            max_generations: Some(200),
            target_fitness: Some(vec![length as f64]),
            ..Default::default()
        },
        ..Default::default()
    };
    population.operators.strategy = strategy;

    EvolutionConfig {
        populations: vec![population],
        run: RunConfig {
            stop_file: None,
            ..Default::default()
        },
        random_seed: Some(42),
        ..Default::default()
    }
}

fn report(label: &str, length: usize, mu: usize, lambda: usize, strategy: SelectionStrategy) {
    let start = Instant::now();
    let mut run: EvolutionRun<BitString> =
        match EvolutionRun::new(config(length, mu, lambda, strategy), standard_registry(), onemax) {
            Ok(run) => run,
            Err(e) => {
                eprintln!("{label}: {e}");
                return;
            }
        };
    let result = match run.run(&random_seeder(length)) {
        Ok(result) => result,
        Err(e) => {
            eprintln!("{label}: {e}");
            return;
        }
    };
    let elapsed = start.elapsed();

    let summary = &result.populations[0];
    let best = summary
        .best
        .as_ref()
        .map(|b| b.raw_fitness.primary())
        .unwrap_or(0.0);
    let evals_per_sec = summary.evaluations as f64 / elapsed.as_secs_f64();

    println!("  {label}");
    println!("    Stop reason:    {:?}", result.stop_reason);
    println!("    Generations:    {}", summary.generation);
    println!("    Evaluations:    {}", summary.evaluations);
    println!("    Elapsed:        {:.2}s", elapsed.as_secs_f64());
    println!("    Evals/sec:      {evals_per_sec:.1}");
    println!("    Best fitness:   {best}/{length}");
}

fn main() {
    println!("=== OneMax Performance Test ===\n");

    for length in [32, 64, 128] {
        println!("Length: {length}");
        report("histogram", length, 30, 20, SelectionStrategy::Histogram);
        report("dmab", length, 30, 20, SelectionStrategy::Dmab { kappa: 1.0 });
        report("uniform", length, 30, 20, SelectionStrategy::Uniform);
        println!();
    }

    println!("=== Scalability Test (fixed length 64) ===\n");

    for (mu, lambda) in [(10, 5), (20, 10), (40, 20), (80, 40)] {
        println!("mu={mu}, lambda={lambda}");
        report("histogram", 64, mu, lambda, SelectionStrategy::Histogram);
        println!();
    }
}
