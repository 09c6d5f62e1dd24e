//! Parallel execution of independent replications
//!
//! This module runs a batch of replications on a rayon thread pool, isolating
//! failures and returning results in replication-index order.
//!
//! # Example: analysing 100 replications
//!
//! ```rust
//! use replication::parallel::{ParallelRunner, simple_progress_reporter};
//!
//! let results = ParallelRunner::new(100, |run_id| {
//!     if run_id % 10 == 9 {
//!         return Err(format!("run_{} has no time series", run_id));
//!     }
//!     Ok(run_id as f64 * 0.5)
//! })
//! .progress(simple_progress_reporter(10))
//! .num_threads(8)
//! .run();
//!
//! assert_eq!(results.len(), 100);
//! assert!(results[9].is_err());
//! ```
//!
//! # Determinism
//!
//! Results are deterministic when:
//! 1. The job only depends on `run_id` (and immutable captured state)
//! 2. Any randomness inside the job is seeded from `run_id`
//! 3. No shared mutable state across replications
//!
//! `results[i]` always belongs to replication `i`, whatever the thread count or the
//! order in which workers finish.
//!
//! # Error Handling
//!
//! A job returning `Err` and a job that panics are both turned into a
//! [`RunFailure`] carrying the cause. Other replications continue normally.
//!
//! # Memory Usage
//!
//! Every in-flight replication holds its inputs in memory. For large batches use
//! [`run_batched`] to bound the number of replications alive at once.

use crate::{BatchSummary, Reducer, RunFailure, RunResult, reduce_in_order};
use rayon::prelude::*;
use std::fmt::Display;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Executes a batch of replications in parallel
///
/// Generic over:
/// - `R`: per-replication result
/// - `E`: per-replication error, reported through its `Display`
/// - `F`: job function type
///
/// # Example
///
/// ```rust
/// use replication::parallel::ParallelRunner;
///
/// let results = ParallelRunner::new(50, |run_id| Ok::<_, String>(run_id * 2))
///     .num_threads(4)
///     .run();
///
/// assert_eq!(results.len(), 50);
/// assert_eq!(results[10], Ok(20));
/// ```
pub struct ParallelRunner<R, E, F>
where
    F: Fn(usize) -> Result<R, E> + Send + Sync,
    R: Send,
    E: Display,
{
    num_runs: usize,
    job: F,
    num_threads: Option<usize>,
    progress_callback: Option<ProgressCallback>,
    _marker: PhantomData<fn() -> (R, E)>,
}

impl<R, E, F> ParallelRunner<R, E, F>
where
    F: Fn(usize) -> Result<R, E> + Send + Sync,
    R: Send,
    E: Display,
{
    /// Create a new parallel runner
    ///
    /// # Arguments
    ///
    /// * `num_runs` - Number of independent replications
    /// * `job` - Closure that runs the full pipeline for a given run_id
    pub fn new(num_runs: usize, job: F) -> Self {
        ParallelRunner {
            num_runs,
            job,
            num_threads: None,
            progress_callback: None,
            _marker: PhantomData,
        }
    }

    /// Set number of worker threads (defaults to rayon's global pool)
    pub fn num_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }

    /// Set progress callback, called with `(completed, total)` after each replication
    ///
    /// Completion order is scheduling dependent; only the count is meaningful.
    pub fn progress<P>(mut self, callback: P) -> Self
    where
        P: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(callback));
        self
    }

    /// Execute all replications and return results in run_id order
    pub fn run(self) -> Vec<RunResult<R>> {
        let progress_counter = AtomicUsize::new(0);

        let pool = self.num_threads.and_then(|n| {
            match rayon::ThreadPoolBuilder::new().num_threads(n).build() {
                Ok(pool) => Some(pool),
                Err(e) => {
                    tracing::warn!(threads = n, error = %e, "falling back to global thread pool");
                    None
                }
            }
        });

        let execute = || {
            (0..self.num_runs)
                .into_par_iter()
                .map(|run_id| {
                    let outcome =
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (self.job)(run_id)));

                    let completed = progress_counter.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(ref callback) = self.progress_callback {
                        callback(completed, self.num_runs);
                    }

                    match outcome {
                        Ok(Ok(result)) => Ok(result),
                        Ok(Err(e)) => Err(RunFailure {
                            run_id,
                            cause: e.to_string(),
                        }),
                        Err(panic) => Err(RunFailure {
                            run_id,
                            cause: format!("panicked: {}", panic_message(panic.as_ref())),
                        }),
                    }
                })
                .collect()
        };

        match pool {
            Some(pool) => pool.install(execute),
            None => execute(),
        }
    }

    /// Execute all replications and fold them into `reducer` in run_id order
    pub fn run_reduced<Red>(self, reducer: Red) -> BatchSummary<Red::Output>
    where
        Red: Reducer<R>,
    {
        reduce_in_order(self.run(), reducer)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run replications in parallel with the default pool
///
/// Convenience function for the common case. For thread count or progress
/// reporting, use [`ParallelRunner`].
pub fn run_parallel<R, E, F>(num_runs: usize, job: F) -> Vec<RunResult<R>>
where
    F: Fn(usize) -> Result<R, E> + Send + Sync,
    R: Send,
    E: Display,
{
    ParallelRunner::new(num_runs, job).run()
}

/// Run replications in batches to limit memory usage
///
/// At most `batch_size` replications are in flight at a time. A `batch_size` of
/// zero runs everything in one batch.
///
/// ```rust
/// use replication::parallel::run_batched;
///
/// let results = run_batched(1000, 100, |run_id| Ok::<_, String>(run_id));
///
/// assert_eq!(results.len(), 1000);
/// assert_eq!(results[999], Ok(999));
/// ```
pub fn run_batched<R, E, F>(num_runs: usize, batch_size: usize, job: F) -> Vec<RunResult<R>>
where
    F: Fn(usize) -> Result<R, E> + Send + Sync,
    R: Send,
    E: Display,
{
    let batch_size = if batch_size == 0 {
        num_runs.max(1)
    } else {
        batch_size
    };
    let mut all_results = Vec::with_capacity(num_runs);

    for batch_start in (0..num_runs).step_by(batch_size) {
        let batch_end = (batch_start + batch_size).min(num_runs);
        let batch_results = run_parallel(batch_end - batch_start, |local_id| {
            job(batch_start + local_id)
        });
        all_results.extend(batch_results.into_iter().map(|result| {
            result.map_err(|failure| RunFailure {
                run_id: batch_start + failure.run_id,
                cause: failure.cause,
            })
        }));
    }

    all_results
}

/// Pre-built progress reporter
///
/// Logs a progress line every `interval` completed replications and on the last one.
pub fn simple_progress_reporter(interval: usize) -> impl Fn(usize, usize) + Send + Sync {
    let interval = interval.max(1);
    move |completed, total| {
        if completed % interval == 0 || completed == total {
            tracing::info!("Completed {}/{} replications", completed, total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct RunStats {
        id: usize,
        count: usize,
    }

    fn counter_job(run_id: usize) -> Result<RunStats, String> {
        Ok(RunStats {
            id: run_id,
            count: 10,
        })
    }

    #[derive(Default)]
    struct IdOrder(Vec<usize>);

    impl Reducer<RunStats> for IdOrder {
        type Output = Vec<usize>;

        fn accumulate(&mut self, partial: RunStats) {
            self.0.push(partial.id);
        }

        fn merge(&mut self, other: Self) {
            self.0.extend(other.0);
        }

        fn finalize(self) -> Vec<usize> {
            self.0
        }
    }

    #[test]
    fn test_parallel_basic() {
        let results = run_parallel(10, counter_job);

        assert_eq!(results.len(), 10);
        for (i, result) in results.iter().enumerate() {
            let stats = result.as_ref().unwrap();
            assert_eq!(stats.id, i);
            assert_eq!(stats.count, 10);
        }
    }

    #[test]
    fn test_parallel_determinism() {
        let run1 = run_parallel(20, counter_job);
        let run2 = run_parallel(20, counter_job);

        assert_eq!(run1, run2);
    }

    #[test]
    fn test_parallel_panic_isolation() {
        let results = run_parallel(10, |run_id| {
            if run_id == 5 {
                panic!("Test panic");
            }
            counter_job(run_id)
        });

        assert_eq!(results.len(), 10);
        let failure = results[5].as_ref().unwrap_err();
        assert_eq!(failure.run_id, 5);
        assert!(failure.cause.contains("Test panic"));
        for (i, result) in results.iter().enumerate() {
            if i != 5 {
                assert!(result.is_ok());
            }
        }
    }

    #[test]
    fn test_parallel_error_isolation() {
        let results = run_parallel(6, |run_id| {
            if run_id % 2 == 0 {
                Err(format!("missing input for run {}", run_id))
            } else {
                counter_job(run_id)
            }
        });

        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 3);
        assert_eq!(
            results[4].as_ref().unwrap_err().cause,
            "missing input for run 4"
        );
    }

    #[test]
    fn test_parallel_progress_callback() {
        use std::sync::Mutex;
        let completed = Arc::new(Mutex::new(0));
        let completed_clone = completed.clone();

        ParallelRunner::new(5, counter_job)
            .progress(move |count, _total| {
                let mut last = completed_clone.lock().unwrap();
                *last = (*last).max(count);
            })
            .run();

        assert_eq!(*completed.lock().unwrap(), 5);
    }

    #[test]
    fn test_parallel_custom_threads() {
        let results = ParallelRunner::new(8, counter_job).num_threads(2).run();

        assert_eq!(results.len(), 8);
        assert!(results.iter().all(|r| r.is_ok()));
    }

    #[test]
    fn test_run_reduced_in_index_order() {
        for threads in [1, 3, 8] {
            let summary = ParallelRunner::new(40, |run_id| {
                if run_id == 13 {
                    return Err("schema mismatch".to_string());
                }
                counter_job(run_id)
            })
            .num_threads(threads)
            .run_reduced(IdOrder::default());

            let expected: Vec<usize> = (0..40).filter(|&i| i != 13).collect();
            assert_eq!(summary.output, expected);
            assert_eq!(summary.valid_runs, 39);
            assert_eq!(summary.skipped_count(), 1);
        }
    }

    #[test]
    fn test_batched_execution() {
        let results = run_batched(50, 10, |run_id| {
            if run_id == 23 {
                return Err("missing".to_string());
            }
            counter_job(run_id)
        });

        assert_eq!(results.len(), 50);
        assert_eq!(results[23].as_ref().unwrap_err().run_id, 23);
        for (i, result) in results.iter().enumerate() {
            if i != 23 {
                assert_eq!(result.as_ref().unwrap().id, i);
            }
        }
    }

    #[test]
    fn test_batched_zero_batch_size() {
        let results = run_batched(7, 0, counter_job);
        assert_eq!(results.len(), 7);
    }

    #[test]
    fn test_simple_progress_reporter() {
        let reporter = simple_progress_reporter(10);
        reporter(10, 100);
        reporter(100, 100);
    }

    #[test]
    fn test_empty_batch() {
        let results = run_parallel(0, counter_job);
        assert!(results.is_empty());

        let summary = ParallelRunner::new(0, counter_job).run_reduced(IdOrder::default());
        assert_eq!(summary.total_runs, 0);
        assert_eq!(summary.valid_runs, 0);
    }
}
