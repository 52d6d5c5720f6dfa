//! Fitness evaluation: evaluator contract, external command evaluator and
//! the bounded evaluation pool.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, mpsc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::schema::{CommandConfig, EvaluationConfig};

use super::candidate::{CandidateId, Fitness};

/// Failure to evaluate a single candidate, or to set up evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvaluationError {
    #[error("Evaluation failed: {0}")]
    Failed(String),
    #[error("Expected {expected} fitness values, got {actual}")]
    Dimension { expected: usize, actual: usize },
    #[error("Fitness value {0} is negative or not finite")]
    OutOfRange(f64),
    #[error("Evaluator timed out after {0:?}")]
    Timeout(Duration),
    #[error("Cannot run evaluator: {0}")]
    Io(String),
    #[error("Cannot build evaluation pool: {0}")]
    Pool(String),
}

/// Computes the fitness vector of a candidate from its external representation.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, representation: &str) -> Result<Vec<f64>, EvaluationError>;
}

impl<F> Evaluator for F
where
    F: Fn(&str) -> Result<Vec<f64>, EvaluationError> + Send + Sync,
{
    fn evaluate(&self, representation: &str) -> Result<Vec<f64>, EvaluationError> {
        self(representation)
    }
}

/// Runs an external program per candidate.
///
/// The representation is written to the program's stdin; the fitness is read
/// from stdout as whitespace-separated numbers.
#[derive(Debug, Clone)]
pub struct CommandEvaluator {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandEvaluator {
    pub fn new(config: &CommandConfig) -> Self {
        Self {
            program: config.program.clone(),
            args: config.args.clone(),
            timeout: config
                .timeout_secs
                .filter(|s| *s > 0.0)
                .map(Duration::from_secs_f64),
        }
    }
}

impl Evaluator for CommandEvaluator {
    fn evaluate(&self, representation: &str) -> Result<Vec<f64>, EvaluationError> {
        let io = |e: std::io::Error| EvaluationError::Io(format!("{}: {e}", self.program));

        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command.spawn().map_err(io)?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| EvaluationError::Io("stdout not captured".to_string()))?;
        let (sender, output) = mpsc::channel();
        thread::spawn(move || {
            let mut text = String::new();
            let result = stdout.read_to_string(&mut text).map(|_| text);
            let _ = sender.send(result);
        });

        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(representation.as_bytes())
        {
            terminate(&mut child);
            return Err(io(e));
        }

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().map_err(io)? {
                break status;
            }
            if let Some(limit) = self.timeout
                && started.elapsed() >= limit
            {
                terminate(&mut child);
                // The reader ends once every process holding the pipe is gone
                let _ = output.recv_timeout(READER_GRACE);
                return Err(EvaluationError::Timeout(limit));
            }
            thread::sleep(Duration::from_millis(5));
        };

        // Descendants may keep stdout open after the program exits
        let remaining = self
            .timeout
            .map(|limit| limit.saturating_sub(started.elapsed()).max(READER_GRACE));
        let received = match remaining {
            Some(wait) => output.recv_timeout(wait).ok(),
            None => output.recv().ok(),
        };
        let Some(text) = received else {
            terminate(&mut child);
            return Err(EvaluationError::Io(format!(
                "{}: output not closed after exit",
                self.program
            )));
        };
        let text = text.map_err(io)?;

        if !status.success() {
            return Err(EvaluationError::Failed(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        parse_fitness(&text)
    }
}

/// How long to wait for the output reader once the program is gone.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Kill the program together with everything it started.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // A negative pid addresses the process group created at spawn
        let group = format!("-{}", child.id());
        let _ = Command::new("kill")
            .args(["-s", "KILL", "--", group.as_str()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
    let _ = child.wait();
}

/// Parse whitespace-separated numbers.
pub fn parse_fitness(text: &str) -> Result<Vec<f64>, EvaluationError> {
    let values = text
        .split_whitespace()
        .map(|token| {
            token
                .parse::<f64>()
                .map_err(|_| EvaluationError::Failed(format!("not a number: {token:?}")))
        })
        .collect::<Result<Vec<f64>, _>>()?;
    if values.is_empty() {
        return Err(EvaluationError::Failed("no fitness values".to_string()));
    }
    if let Some(bad) = values.iter().find(|v| !v.is_finite()) {
        return Err(EvaluationError::Failed(format!("non-finite fitness {bad}")));
    }
    Ok(values)
}

/// Candidate waiting for evaluation.
#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub id: CandidateId,
    pub representation: String,
}

/// Evaluates batches of candidates on a bounded worker pool.
///
/// Results are keyed by candidate identity; a failing candidate never aborts
/// the batch.
pub struct EvaluatorPool {
    evaluator: Box<dyn Evaluator>,
    pool: rayon::ThreadPool,
    cache: Option<Mutex<HashMap<String, Vec<f64>>>>,
    evaluations: AtomicU64,
}

impl EvaluatorPool {
    pub fn new<E>(config: &EvaluationConfig, evaluator: E) -> Result<Self, EvaluationError>
    where
        E: Evaluator + 'static,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.concurrency.max(1))
            .thread_name(|i| format!("evaluator-{i}"))
            .build()
            .map_err(|e| EvaluationError::Pool(e.to_string()))?;

        let cacheable = config.cache && !config.dynamic_fitness;
        Ok(Self {
            evaluator: Box::new(evaluator),
            pool,
            cache: cacheable.then(|| Mutex::new(HashMap::new())),
            evaluations: AtomicU64::new(0),
        })
    }

    /// Evaluator calls performed so far (cache hits excluded).
    pub fn evaluations(&self) -> u64 {
        self.evaluations.load(Ordering::Relaxed)
    }

    /// Evaluate every job, expecting `dimensions` values per candidate.
    ///
    /// Blocks until the whole batch is done.
    pub fn evaluate_batch(
        &self,
        jobs: Vec<EvaluationJob>,
        dimensions: usize,
    ) -> Vec<(CandidateId, Result<Fitness, EvaluationError>)> {
        self.pool.install(|| {
            jobs.into_par_iter()
                .map(|job| {
                    let result = self.evaluate_one(&job.representation, dimensions);
                    (job.id, result)
                })
                .collect()
        })
    }

    fn evaluate_one(&self, representation: &str, dimensions: usize) -> Result<Fitness, EvaluationError> {
        if let Some(cache) = &self.cache
            && let Ok(cache) = cache.lock()
            && let Some(values) = cache.get(representation)
        {
            return Ok(Fitness::new(values.clone()));
        }

        self.evaluations.fetch_add(1, Ordering::Relaxed);
        let values = self.evaluator.evaluate(representation)?;
        if values.len() != dimensions {
            return Err(EvaluationError::Dimension {
                expected: dimensions,
                actual: values.len(),
            });
        }
        // Clone scaling assumes non-negative values
        if let Some(bad) = values.iter().find(|v| !(v.is_finite() && **v >= 0.0)) {
            return Err(EvaluationError::OutOfRange(*bad));
        }

        if let Some(cache) = &self.cache
            && let Ok(mut cache) = cache.lock()
        {
            cache.insert(representation.to_string(), values.clone());
        }
        Ok(Fitness::new(values))
    }
}
