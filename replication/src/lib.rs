//! Independent replications and the reduction of their results
//!
//! A batch is a fixed number of replications identified by their index. Each
//! replication runs to completion on its own (see [`parallel`]) and yields either a
//! result or a [`RunFailure`]. Results are then folded, strictly in index order,
//! into a [`Reducer`] so aggregate statistics do not depend on scheduling.

use std::fmt;

pub mod parallel;

/// Accumulates per-replication results into a final aggregate
///
/// Implementations must make `merge` associative: merging the partial reducers of
/// two disjoint index ranges, in index order, must equal accumulating every result
/// into a single reducer.
pub trait Reducer<P> {
    type Output;

    /// Fold one replication's result into the running state
    fn accumulate(&mut self, partial: P);

    /// Absorb another reducer covering a later range of replications
    fn merge(&mut self, other: Self)
    where
        Self: Sized;

    /// Consume the reducer and produce the aggregate
    fn finalize(self) -> Self::Output;
}

/// A replication that did not produce a result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub run_id: usize,
    pub cause: String,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "run {} skipped: {}", self.run_id, self.cause)
    }
}

impl std::error::Error for RunFailure {}

pub type RunResult<R> = Result<R, RunFailure>;

/// Outcome of a whole batch after reduction
#[derive(Debug, Clone)]
pub struct BatchSummary<O> {
    pub total_runs: usize,
    pub valid_runs: usize,
    pub skipped: Vec<RunFailure>,
    pub output: O,
}

impl<O> BatchSummary<O> {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Replace the output while keeping the batch bookkeeping
    pub fn map<U>(self, f: impl FnOnce(O) -> U) -> BatchSummary<U> {
        BatchSummary {
            total_runs: self.total_runs,
            valid_runs: self.valid_runs,
            skipped: self.skipped,
            output: f(self.output),
        }
    }
}

/// Feed results into `reducer` in the order given and finalize it
///
/// Failures are collected into [`BatchSummary::skipped`] and never reach the reducer.
/// With every run failed the reducer is still finalized, on no input.
pub fn reduce_in_order<P, R>(results: Vec<RunResult<P>>, mut reducer: R) -> BatchSummary<R::Output>
where
    R: Reducer<P>,
{
    let total_runs = results.len();
    let mut skipped = Vec::new();
    let mut valid_runs = 0;

    for result in results {
        match result {
            Ok(partial) => {
                reducer.accumulate(partial);
                valid_runs += 1;
            }
            Err(failure) => {
                tracing::warn!(run_id = failure.run_id, cause = %failure.cause, "replication skipped");
                skipped.push(failure);
            }
        }
    }

    BatchSummary {
        total_runs,
        valid_runs,
        skipped,
        output: reducer.finalize(),
    }
}
