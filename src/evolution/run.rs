//! Multi-population run: initialization or recovery, the generation loop,
//! persistence, statistics and migration.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::time::Instant;

use crate::schema::{
    BestCandidate, ConfigError, EvolutionConfig, GenerationReport, PopulationSummary, RunResult,
    StopReason,
};

use super::candidate::{Genotype, Seeder};
use super::evaluator::{EvaluationError, Evaluator, EvaluatorPool};
use super::operator::OperatorRegistry;
use super::persist::{self, PersistError};
use super::pipeline::{Pipeline, PipelineError, PipelineState};
use super::stop::{StopController, StopHandle};

/// Moves individuals between populations.
///
/// Called between rounds of population steps, never during a step.
pub trait Migrator<G: Genotype> {
    fn migrate(&mut self, pipelines: &mut [Pipeline<G>]);
}

impl<G, F> Migrator<G> for F
where
    G: Genotype,
    F: FnMut(&mut [Pipeline<G>]),
{
    fn migrate(&mut self, pipelines: &mut [Pipeline<G>]) {
        self(pipelines)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Persist(#[from] PersistError),
    #[error(transparent)]
    Pipeline(PipelineError),
    #[error("Cannot write statistics: {0}")]
    Statistics(#[from] io::Error),
}

impl From<PipelineError> for RunError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Config(e) => RunError::Config(e),
            PipelineError::Persist(e) => RunError::Persist(e),
            other => RunError::Pipeline(other),
        }
    }
}

/// Random stream seed of the population at `index`.
fn population_seed(run_seed: u64, index: usize) -> u64 {
    run_seed.wrapping_add((index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

pub struct EvolutionRun<G: Genotype> {
    config: EvolutionConfig,
    registry: OperatorRegistry<G>,
    evaluator: EvaluatorPool,
    pipelines: Vec<Pipeline<G>>,
    stop: StopController,
    migrator: Option<Box<dyn Migrator<G>>>,
    statistics: Option<BufWriter<File>>,
    seed: u64,
}

impl<G: Genotype> EvolutionRun<G> {
    /// Validate the configuration and set up every population.
    ///
    /// Populations with a snapshot in the recovery directory are restored
    /// from it; the others start empty and are seeded by the first call to
    /// [`EvolutionRun::run_with_callback`].
    pub fn new<E>(
        config: EvolutionConfig,
        mut registry: OperatorRegistry<G>,
        evaluator: E,
    ) -> Result<Self, RunError>
    where
        E: Evaluator + 'static,
    {
        config.validate()?;
        let evaluator = EvaluatorPool::new(&config.evaluation, evaluator)?;
        let seed = config.random_seed.unwrap_or_else(rand::random);
        log::info!("Random seed {seed}");

        let mut pipelines = Vec::with_capacity(config.populations.len());
        for (index, population) in config.populations.iter().enumerate() {
            let population_seed = population_seed(seed, index);
            let snapshot = match &config.run.recovery_dir {
                Some(dir) => persist::load_if_present::<G>(dir, &population.name)?,
                None => None,
            };
            let pipeline = match snapshot {
                Some(snapshot) => Pipeline::restore(
                    snapshot,
                    population.clone(),
                    &mut registry,
                    config.run.discard_fitness_on_load,
                    population_seed,
                )?,
                None => Pipeline::new(population.clone(), &registry, population_seed)?,
            };
            pipelines.push(pipeline);
        }

        Ok(Self {
            stop: StopController::new(config.run.stop_file.clone()),
            config,
            registry,
            evaluator,
            pipelines,
            migrator: None,
            statistics: None,
            seed,
        })
    }

    pub fn with_migrator<M>(mut self, migrator: M) -> Self
    where
        M: Migrator<G> + 'static,
    {
        self.migrator = Some(Box::new(migrator));
        self
    }

    pub fn config(&self) -> &EvolutionConfig {
        &self.config
    }

    pub fn registry(&self) -> &OperatorRegistry<G> {
        &self.registry
    }

    pub fn pipelines(&self) -> &[Pipeline<G>] {
        &self.pipelines
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Handle for requesting a graceful stop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.handle()
    }

    /// Run until the first population stops.
    pub fn run_with_callback<F>(
        &mut self,
        seeder: &dyn Seeder<G>,
        mut callback: F,
    ) -> Result<RunResult, RunError>
    where
        F: FnMut(&GenerationReport),
    {
        let start_time = Instant::now();
        self.open_statistics()?;

        let mut stopped = self.initialize(seeder)?;

        let (stop_reason, stopped_by) = loop {
            if let Some(stop) = stopped.take() {
                break stop;
            }
            if let Some(stop) = self.check_all() {
                break stop;
            }

            for index in 0..self.pipelines.len() {
                match self.pipelines[index].step(&self.registry, &self.evaluator) {
                    Ok(report) => {
                        self.persist(index)?;
                        self.write_statistics(index)?;
                        callback(&report);
                    }
                    Err(PipelineError::Extinction(name)) => {
                        log::warn!("Population {name} went extinct");
                    }
                    Err(e) => return Err(e.into()),
                }

                let external = self.stop.external_stop_requested();
                let pipeline = &self.pipelines[index];
                if let Some(reason) = pipeline.check_stop_condition(external) {
                    stopped = Some((reason, Some(pipeline.name().to_string())));
                    break;
                }
            }

            if stopped.is_none()
                && let Some(migrator) = self.migrator.as_mut()
            {
                migrator.migrate(&mut self.pipelines);
            }
        };

        match &stopped_by {
            Some(name) => log::info!("Run stopped by population {name}: {stop_reason:?}"),
            None => log::info!("Run stopped: {stop_reason:?}"),
        }

        Ok(RunResult {
            stop_reason,
            stopped_by,
            populations: self.summaries(),
            elapsed_seconds: start_time.elapsed().as_secs_f64(),
        })
    }

    /// Run without observing generations.
    pub fn run(&mut self, seeder: &dyn Seeder<G>) -> Result<RunResult, RunError> {
        self.run_with_callback(seeder, |_| {})
    }

    /// Seed fresh populations and evaluate anything pending in restored ones.
    fn initialize(
        &mut self,
        seeder: &dyn Seeder<G>,
    ) -> Result<Option<(StopReason, Option<String>)>, RunError> {
        for index in 0..self.pipelines.len() {
            let pipeline = &mut self.pipelines[index];
            let result = if pipeline.state() == PipelineState::Idle {
                pipeline.initialize(seeder, &self.evaluator)
            } else {
                pipeline.evaluate_pending(&self.evaluator);
                Ok(())
            };
            match result {
                Ok(()) => self.persist(index)?,
                Err(PipelineError::Extinction(name)) => {
                    log::warn!("Population {name} could not be seeded");
                    return Ok(Some((StopReason::Extinction, Some(name))));
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    fn check_all(&self) -> Option<(StopReason, Option<String>)> {
        let external = self.stop.external_stop_requested();
        self.pipelines.iter().find_map(|pipeline| {
            pipeline
                .check_stop_condition(external)
                .map(|reason| (reason, Some(pipeline.name().to_string())))
        })
    }

    fn persist(&mut self, index: usize) -> Result<(), RunError> {
        let Some(dir) = self.config.run.recovery_dir.as_deref() else {
            return Ok(());
        };
        let snapshot = self.pipelines[index].snapshot(&self.registry);
        persist::save_snapshot(dir, &snapshot)?;
        Ok(())
    }

    // ========================================================================
    // Statistics
    // ========================================================================

    fn open_statistics(&mut self) -> Result<(), RunError> {
        let Some(path) = self.config.run.statistics_file.as_deref() else {
            return Ok(());
        };
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let fresh = file.metadata()?.len() == 0;
        let mut writer = BufWriter::new(file);
        if fresh {
            write!(writer, "population,kind,generation,live,entropy,best,mean")?;
            for name in self.registry.names() {
                write!(writer, ",{name}_calls,{name}_weight")?;
            }
            writeln!(writer)?;
            writer.flush()?;
        }
        self.statistics = Some(writer);
        Ok(())
    }

    fn write_statistics(&mut self, index: usize) -> Result<(), RunError> {
        let Some(writer) = self.statistics.as_mut() else {
            return Ok(());
        };
        let pipeline = &self.pipelines[index];
        pipeline
            .policy()
            .dump_statistics(pipeline.population(), writer)?;

        let selector = pipeline.selector();
        for name in self.registry.names() {
            match selector.record(name) {
                Some(record) => write!(
                    writer,
                    ",{},{:.4}",
                    record.calls_last_generation,
                    selector.weight(record)
                )?,
                None => write!(writer, ",0,0")?,
            }
        }
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }

    fn summaries(&self) -> Vec<PopulationSummary> {
        self.pipelines
            .iter()
            .map(|pipeline| {
                let population = pipeline.population();
                PopulationSummary {
                    name: pipeline.name().to_string(),
                    generation: pipeline.generation(),
                    evaluations: pipeline.evaluations(),
                    live: population.live_count(),
                    best: population.best_raw().and_then(|c| {
                        c.raw_fitness.clone().map(|raw_fitness| BestCandidate {
                            id: c.id,
                            raw_fitness,
                            representation: c.genome.external_representation(),
                        })
                    }),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::evolution::bitstring::{BitString, onemax, random_seeder, standard_registry};
    use crate::schema::{PopulationConfig, RunConfig, StopConfig};

    fn population(name: &str, max_generations: u64) -> PopulationConfig {
        PopulationConfig {
            name: name.to_string(),
            mu: 8,
            lambda: 4,
            nu: 8,
            stop: StopConfig {
                max_generations: Some(max_generations),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn config(populations: Vec<PopulationConfig>, run: RunConfig) -> EvolutionConfig {
        EvolutionConfig {
            populations,
            run: RunConfig {
                stop_file: None,
                ..run
            },
            random_seed: Some(17),
            ..Default::default()
        }
    }

    fn new_run(config: EvolutionConfig) -> EvolutionRun<BitString> {
        EvolutionRun::new(config, standard_registry(), onemax).unwrap()
    }

    #[test]
    fn test_run_to_max_generations() {
        let dir = tempfile::tempdir().unwrap();
        let statistics = dir.path().join("stats.csv");
        let mut run = new_run(config(
            vec![population("main", 3)],
            RunConfig {
                statistics_file: Some(statistics.clone()),
                ..Default::default()
            },
        ));

        let mut reports = Vec::new();
        let result = run
            .run_with_callback(&random_seeder(16), |r| reports.push(r.generation))
            .unwrap();
        assert_eq!(result.stop_reason, StopReason::MaxGenerations);
        assert_eq!(result.stopped_by.as_deref(), Some("main"));
        assert_eq!(reports, vec![1, 2, 3]);
        assert_eq!(result.populations[0].generation, 3);
        assert!(result.populations[0].best.is_some());

        let csv = std::fs::read_to_string(&statistics).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("population,kind,generation"));
        assert!(lines[0].ends_with("xover_calls,xover_weight"));
        assert!(lines[1].starts_with("main,Enhanced,1,"));
    }

    #[test]
    fn test_resume_from_snapshots() {
        let dir = tempfile::tempdir().unwrap();
        let run_config = RunConfig {
            recovery_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let mut first = new_run(config(vec![population("main", 2)], run_config.clone()));
        first.run(&random_seeder(16)).unwrap();
        assert!(dir.path().join("main.json").exists());

        let mut second = new_run(config(vec![population("main", 4)], run_config));
        assert_eq!(second.pipelines()[0].generation(), 2);
        let result = second.run(&random_seeder(16)).unwrap();
        assert_eq!(result.populations[0].generation, 4);
        assert!(result.populations[0].evaluations > 8);
    }

    #[test]
    fn test_external_stop() {
        let mut run = new_run(config(vec![population("main", 100)], RunConfig::default()));
        run.stop_handle().request_stop();
        let result = run.run(&random_seeder(8)).unwrap();
        assert_eq!(result.stop_reason, StopReason::ExternalRequest);
        assert_eq!(result.populations[0].generation, 0);
    }

    #[test]
    fn test_first_population_to_stop_ends_run() {
        let rounds = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&rounds);
        let mut run = new_run(config(
            vec![population("a", 2), population("b", 10)],
            RunConfig::default(),
        ))
        .with_migrator(move |pipelines: &mut [Pipeline<BitString>]| {
            assert_eq!(pipelines.len(), 2);
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let result = run.run(&random_seeder(8)).unwrap();
        assert_eq!(result.stopped_by.as_deref(), Some("a"));
        assert_eq!(result.populations[0].generation, 2);
        assert_eq!(result.populations[1].generation, 1);
        assert_eq!(rounds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_persistence_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let mut run = new_run(config(
            vec![population("main", 3)],
            RunConfig {
                recovery_dir: Some(blocker.join("inner")),
                ..Default::default()
            },
        ));
        assert!(matches!(
            run.run(&random_seeder(8)),
            Err(RunError::Persist(_))
        ));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = population("main", 3);
        bad.mu = 0;
        let result = EvolutionRun::new(
            config(vec![bad], RunConfig::default()),
            standard_registry(),
            onemax,
        );
        assert!(matches!(result, Err(RunError::Config(_))));
    }

    #[test]
    fn test_population_seeds_differ() {
        assert_ne!(population_seed(1, 0), population_seed(1, 1));
        assert_eq!(population_seed(5, 0), 5);
    }
}
