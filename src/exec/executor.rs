// src/exec/executor.rs

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde_json::Value;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::{OperationResult, OperationSet, Outcome, PipelineRun};
use crate::errors::{OperationError, PipelineError, Result};
use crate::types::OperationId;

use super::observer::RunObserver;

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunResults {
    /// One entry per operation that ran, keyed by id.
    pub results: BTreeMap<OperationId, OperationResult>,
    /// Operations that were never admitted because the run was cancelled.
    pub not_started: Vec<OperationId>,
    /// Wall-clock time from the first admission to the last settlement.
    pub wall_clock: Duration,
    pub cancelled: bool,
}

impl RunResults {
    /// `true` only if every operation ran and succeeded.
    pub fn success(&self) -> bool {
        self.not_started.is_empty() && self.results.values().all(OperationResult::success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &OperationResult> {
        self.results.values().filter(|r| !r.success())
    }
}

/// Bookkeeping for a launched operation, keyed by its Tokio task id.
struct InFlight {
    id: OperationId,
    admitted_at: Instant,
}

/// Drives a [`PipelineRun`] to completion.
///
/// A single coordinator loop owns the run state. Admitted operations are
/// spawned into a `JoinSet`; the loop then waits for the *first* of them to
/// settle, records the result, and recomputes the ready set. No polling is
/// involved and at most `max_concurrency` operations are in flight.
#[derive(Debug, Clone)]
pub struct Executor {
    max_concurrency: usize,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every operation of `set`, honouring dependencies, priority and the
    /// concurrency limit.
    ///
    /// Operation failures are recorded in the results and never returned as
    /// errors. The only errors are graph/configuration problems, which are
    /// detected before the first operation is launched.
    ///
    /// Cancelling the token stops admission; operations already in flight
    /// are allowed to settle and the rest are listed in
    /// [`RunResults::not_started`].
    pub async fn run<O: RunObserver>(
        &self,
        set: OperationSet,
        observer: &mut O,
    ) -> Result<RunResults> {
        let mut run = PipelineRun::new(set, self.max_concurrency)?;
        let run_start = Instant::now();

        let mut join_set: JoinSet<(std::result::Result<Value, OperationError>, Instant)> =
            JoinSet::new();
        let mut in_flight: HashMap<task::Id, InFlight> = HashMap::new();
        let mut cancelled = false;

        info!(
            operations = run.progress().total,
            max_concurrency = self.max_concurrency,
            "executor: starting run"
        );

        loop {
            if !cancelled && self.cancel.is_cancelled() {
                cancelled = true;
                stop_admission(&mut run, observer);
            }

            for op in run.admit() {
                observer.operation_admitted(&op, run.progress());

                let work = op.work.clone();
                let admitted_at = Instant::now();
                let handle = join_set.spawn(async move {
                    let outcome = work.invoke().await;
                    (outcome, Instant::now())
                });

                debug!(operation = %op.id, "launched operation");
                in_flight.insert(
                    handle.id(),
                    InFlight {
                        id: op.id.clone(),
                        admitted_at,
                    },
                );
            }

            if run.is_finished() {
                break;
            }
            run.check_progress()?;

            tokio::select! {
                biased;

                _ = self.cancel.cancelled(), if !cancelled => {
                    cancelled = true;
                    stop_admission(&mut run, observer);
                }

                joined = join_set.join_next_with_id() => {
                    let Some(joined) = joined else {
                        // Running set is non-empty but nothing is in flight.
                        return Err(PipelineError::UnsatisfiableDependencies(run.pending_ids()));
                    };

                    let (task_id, outcome, finished) = match joined {
                        Ok((task_id, (outcome, finished))) => (task_id, outcome, finished),
                        Err(err) => (err.id(), Err(join_error_to_operation_error(err)), Instant::now()),
                    };

                    let Some(flight) = in_flight.remove(&task_id) else {
                        warn!(?task_id, "completion for unknown task; ignoring");
                        continue;
                    };

                    let outcome = match outcome {
                        Ok(value) => Outcome::Success(value),
                        Err(err) => {
                            warn!(operation = %flight.id, error = %err, "operation failed");
                            Outcome::Failure(err)
                        }
                    };

                    let result = OperationResult {
                        id: flight.id.clone(),
                        outcome,
                        duration: finished.saturating_duration_since(flight.admitted_at),
                        started_at: flight.admitted_at.saturating_duration_since(run_start),
                        finished_at: finished.saturating_duration_since(run_start),
                    };

                    if run.settle(result) {
                        if let (Some(op), Some(result)) =
                            (run.operation(&flight.id), run.completed().get(&flight.id))
                        {
                            observer.operation_settled(op, result, run.progress());
                        }
                    }
                }
            }
        }

        let wall_clock = run_start.elapsed();
        let (results, not_started) = run.into_results();

        info!(
            settled = results.len(),
            failed = results.values().filter(|r| !r.success()).count(),
            not_started = not_started.len(),
            wall_clock_ms = wall_clock.as_millis() as u64,
            "executor: run finished"
        );

        Ok(RunResults {
            results,
            not_started,
            wall_clock,
            cancelled,
        })
    }
}

fn stop_admission<O: RunObserver>(run: &mut PipelineRun, observer: &mut O) {
    run.stop_admitting();
    observer.admission_stopped(&run.pending_ids());
}

pub(crate) fn join_error_to_operation_error(err: JoinError) -> OperationError {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_string());
        OperationError::Panicked(message)
    } else {
        OperationError::Cancelled
    }
}
