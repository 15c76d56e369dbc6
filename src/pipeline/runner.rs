// src/pipeline/runner.rs

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dag::{DagGraph, Operation, OperationResult, OperationSet, OperationWork, RunProgress};
use crate::diagnostics::{Classifier, ErrorKind, RecoveryRegistry, Severity};
use crate::errors::{OperationError, PipelineError, Result};
use crate::exec::executor::join_error_to_operation_error;
use crate::exec::{Executor, RunObserver, RunResults};
use crate::metrics::OperationMetrics;
use crate::status::{ErrorReport, FailedOperation, Phase, StatusTracker};
use crate::types::OperationId;

/// Concurrency limit used when nothing else is configured.
pub const DEFAULT_MAX_CONCURRENCY: usize = 3;

const NOT_STARTED: &str = "not started: pipeline cancelled";

/// What [`PipelineRunner::execute`] hands back once a pipeline is terminal.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub pipeline_id: String,
    pub success: bool,
    pub run: RunResults,
    pub metrics: OperationMetrics,
}

/// Runs operation sets and keeps a [`StatusTracker`] in sync with them.
///
/// Every failed attempt is classified and reported. When the classification
/// asks for automated recovery and a recovery is registered for the
/// operation, the recovery runs and the operation is retried while it has
/// retries left.
#[derive(Debug, Clone)]
pub struct PipelineRunner {
    tracker: Arc<StatusTracker>,
    classifier: Arc<Classifier>,
    recoveries: Arc<RecoveryRegistry>,
    max_concurrency: usize,
    cancel: CancellationToken,
}

impl PipelineRunner {
    pub fn new(tracker: Arc<StatusTracker>) -> Self {
        Self {
            tracker,
            classifier: Arc::new(Classifier::default()),
            recoveries: Arc::new(RecoveryRegistry::new()),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub fn with_recoveries(mut self, recoveries: RecoveryRegistry) -> Self {
        self.recoveries = Arc::new(recoveries);
        self
    }

    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn tracker(&self) -> &Arc<StatusTracker> {
        &self.tracker
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `set` as pipeline `pipeline_id`.
    ///
    /// Configuration and graph errors are reported as a critical error, the
    /// pipeline is completed as failed and the error is returned; no
    /// operation runs in that case. Operation failures never produce an
    /// `Err`: they show up in [`PipelineOutcome::success`] and the tracker.
    pub async fn execute(&self, pipeline_id: &str, mut set: OperationSet) -> Result<PipelineOutcome> {
        self.tracker.initialize(pipeline_id, set.len());

        if let Err(err) = self.preflight(&set) {
            self.fail_before_start(pipeline_id, &err);
            return Err(err);
        }

        let sequential = set.sequential_estimate();
        for op in set.operations_mut() {
            op.work = self.guard(pipeline_id, op);
        }

        info!(
            pipeline = %pipeline_id,
            operations = set.len(),
            skipped = set.skipped().len(),
            max_concurrency = self.max_concurrency,
            "starting pipeline"
        );

        let executor = Executor::new(self.max_concurrency).with_cancellation(self.cancel.clone());
        let mut observer = TrackerObserver::new(pipeline_id, &self.tracker);

        let run = match executor.run(set, &mut observer).await {
            Ok(run) => run,
            Err(err) => {
                self.fail_before_start(pipeline_id, &err);
                return Err(err);
            }
        };

        let metrics = OperationMetrics::compute(sequential, run.wall_clock);
        let failures: Vec<FailedOperation> = run
            .failures()
            .map(|result| FailedOperation {
                id: result.id.clone(),
                error: result
                    .error()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            })
            .chain(run.not_started.iter().map(|id| FailedOperation {
                id: id.clone(),
                error: NOT_STARTED.to_string(),
            }))
            .collect();

        let success = run.success();
        if run.cancelled {
            warn!(
                pipeline = %pipeline_id,
                not_started = run.not_started.len(),
                "pipeline cancelled"
            );
        }

        self.tracker.record_failures(pipeline_id, failures);
        self.tracker.complete(pipeline_id, success, Some(metrics));

        Ok(PipelineOutcome {
            pipeline_id: pipeline_id.to_string(),
            success,
            run,
            metrics,
        })
    }

    fn preflight(&self, set: &OperationSet) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(PipelineError::ConfigError(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        DagGraph::build(set)?;
        Ok(())
    }

    fn fail_before_start(&self, pipeline_id: &str, err: &PipelineError) {
        self.tracker.report(
            pipeline_id,
            ErrorReport::new(ErrorKind::Unknown, Severity::Critical, err.to_string())
                .with_details(json!({ "stage": "validation" })),
        );
        self.tracker.complete(pipeline_id, false, None);
    }

    fn guard(&self, pipeline_id: &str, op: &Operation) -> OperationWork {
        let attempt = Arc::new(GuardedAttempt {
            pipeline_id: pipeline_id.to_string(),
            operation_id: op.id.clone(),
            retries: op.retries,
            timeout: op.timeout,
            work: op.work.clone(),
            tracker: Arc::clone(&self.tracker),
            classifier: Arc::clone(&self.classifier),
            recoveries: Arc::clone(&self.recoveries),
        });

        OperationWork::new(move || {
            let attempt = Arc::clone(&attempt);
            async move { attempt.run().await }
        })
    }
}

/// Wraps an operation's work with timeout, classification, recovery and
/// retry.
struct GuardedAttempt {
    pipeline_id: String,
    operation_id: OperationId,
    retries: u32,
    timeout: Option<Duration>,
    work: OperationWork,
    tracker: Arc<StatusTracker>,
    classifier: Arc<Classifier>,
    recoveries: Arc<RecoveryRegistry>,
}

impl GuardedAttempt {
    async fn run(&self) -> std::result::Result<Value, OperationError> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match self.invoke_once().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let classification = self.classifier.classify(&self.operation_id, &err);
            let recovered = if classification.wants_recovery() {
                let recovered = self.recoveries.attempt(&self.operation_id).await;
                if recovered.is_some() {
                    self.tracker.record_recovery_attempt(&self.pipeline_id);
                }
                recovered
            } else {
                None
            };
            let retrying = recovered == Some(true) && attempt <= self.retries;

            let mut report = ErrorReport::new(
                classification.kind,
                classification.severity,
                format!("{} failed: {err}", self.operation_id),
            )
            .for_operation(&self.operation_id)
            .with_details(json!({ "attempt": attempt, "retrying": retrying }))
            .with_resolution(classification.resolution.clone())
            .retrying(retrying);
            if let OperationError::Panicked(payload) = &err {
                report = report.with_stack(payload.clone());
            }
            self.tracker.report(&self.pipeline_id, report);

            if !retrying {
                return Err(err);
            }
            info!(
                pipeline = %self.pipeline_id,
                operation = %self.operation_id,
                attempt = attempt + 1,
                "retrying operation after recovery"
            );
        }
    }

    /// One attempt in its own task, so a panic or timeout stays contained.
    async fn invoke_once(&self) -> std::result::Result<Value, OperationError> {
        let mut handle = tokio::spawn(self.work.invoke());

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return Err(OperationError::TimedOut(limit));
                }
            },
            None => handle.await,
        };

        joined.unwrap_or_else(|err| Err(join_error_to_operation_error(err)))
    }
}

/// Forwards scheduler events to the status tracker.
///
/// The reported phase is the earliest phase among operations still in
/// flight, so a long install keeps the pipeline in `DependencyInstall` even
/// when a later-phase sibling starts next to it.
struct TrackerObserver<'a> {
    pipeline_id: &'a str,
    tracker: &'a StatusTracker,
    in_flight: BTreeMap<OperationId, Phase>,
}

impl<'a> TrackerObserver<'a> {
    fn new(pipeline_id: &'a str, tracker: &'a StatusTracker) -> Self {
        Self {
            pipeline_id,
            tracker,
            in_flight: BTreeMap::new(),
        }
    }

    fn live(&self) -> bool {
        !self.tracker.is_terminal(self.pipeline_id)
    }

    fn current_phase(&self, fallback: Phase) -> Phase {
        self.in_flight.values().copied().min().unwrap_or(fallback)
    }
}

impl RunObserver for TrackerObserver<'_> {
    fn operation_admitted(&mut self, op: &Operation, progress: RunProgress) {
        self.in_flight.insert(op.id.clone(), op.phase);
        if !self.live() {
            return;
        }
        self.tracker.update(
            self.pipeline_id,
            self.current_phase(op.phase),
            progress.percent(),
            format!("Running {}", op.id),
            Some(json!({
                "operation": op.id,
                "event": "started",
                "running": progress.running,
                "settled": progress.settled,
                "total": progress.total,
            })),
        );
    }

    fn operation_settled(&mut self, op: &Operation, result: &OperationResult, progress: RunProgress) {
        self.in_flight.remove(&op.id);
        if !self.live() {
            debug!(operation = %op.id, "pipeline already terminal; not forwarding settlement");
            return;
        }
        let message = match result.error() {
            None => format!("{} completed", op.id),
            Some(err) => format!("{} failed: {err}", op.id),
        };
        self.tracker.update(
            self.pipeline_id,
            self.current_phase(op.phase),
            progress.percent(),
            message,
            Some(json!({
                "operation": op.id,
                "event": "settled",
                "success": result.success(),
                "duration_ms": result.duration.as_millis() as u64,
                "settled": progress.settled,
                "total": progress.total,
            })),
        );
    }

    fn admission_stopped(&mut self, pending: &[OperationId]) {
        if !self.live() {
            return;
        }
        let Some(status) = self.tracker.get_status(self.pipeline_id) else {
            return;
        };
        self.tracker.update(
            self.pipeline_id,
            status.phase,
            status.progress,
            format!(
                "Cancellation requested; {} operation(s) will not start",
                pending.len()
            ),
            Some(json!({ "event": "cancelled", "not_started": pending })),
        );
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::diagnostics::{ClassificationRule, RecoveryAction};

    fn failing_until(calls: Arc<AtomicU32>, succeed_on: u32) -> OperationWork {
        OperationWork::new(move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n >= succeed_on {
                    Ok(json!(n))
                } else {
                    Err(OperationError::failed("ECONNREFUSED"))
                }
            }
        })
    }

    #[tokio::test]
    async fn recovered_operation_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let tracker = Arc::new(StatusTracker::new());
        let runner = PipelineRunner::new(Arc::clone(&tracker))
            .with_classifier(Classifier::empty().with_rule(
                "flaky",
                ClassificationRule::new(ErrorKind::Network, Severity::Warning)
                    .with_resolution("reconnect", true),
            ))
            .with_recoveries(
                RecoveryRegistry::new().with("flaky", RecoveryAction::new(|| async { Ok(()) })),
            );

        let set = OperationSet::new()
            .with(Operation::new("flaky", failing_until(Arc::clone(&calls), 2)).with_retries(1));
        let outcome = runner.execute("p", set).await.unwrap();

        assert!(outcome.success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let metrics = tracker.get_metrics("p").unwrap();
        assert_eq!(metrics.recovery_attempts, 1);
        assert_eq!(metrics.warning_count, 1);
        assert_eq!(tracker.get_status("p").unwrap().phase, Phase::Completed);
    }

    #[tokio::test]
    async fn no_retry_without_automated_resolution() {
        let calls = Arc::new(AtomicU32::new(0));
        let tracker = Arc::new(StatusTracker::new());
        let runner = PipelineRunner::new(Arc::clone(&tracker)).with_recoveries(
            RecoveryRegistry::new().with("other", RecoveryAction::new(|| async { Ok(()) })),
        );

        let set = OperationSet::new()
            .with(Operation::new("other", failing_until(Arc::clone(&calls), 5)).with_retries(3));
        let outcome = runner.execute("p", set).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.get_metrics("p").unwrap().recovery_attempts, 0);
        assert_eq!(tracker.get_errors("p").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_classified_as_timeout() {
        let tracker = Arc::new(StatusTracker::new());
        let runner = PipelineRunner::new(Arc::clone(&tracker));
        let slow = OperationWork::new(|| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(Value::Null)
        });
        let set = OperationSet::new()
            .with(Operation::new("slow", slow).with_timeout(Duration::from_millis(50)));

        let outcome = runner.execute("p", set).await.unwrap();

        assert!(!outcome.success);
        let errors = tracker.get_errors("p");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, ErrorKind::Timeout);
        assert_eq!(errors[0].operation_id.as_deref(), Some("slow"));
    }

    #[tokio::test]
    async fn panicking_work_is_reported() {
        let tracker = Arc::new(StatusTracker::new());
        let runner = PipelineRunner::new(Arc::clone(&tracker));
        let boom = OperationWork::new(|| async {
            if true {
                panic!("kaboom");
            }
            Ok(Value::Null)
        });
        let set = OperationSet::new()
            .with(Operation::new("boom", boom))
            .with(Operation::new("after", OperationWork::noop()).after("boom"));

        let outcome = runner.execute("p", set).await.unwrap();

        assert!(!outcome.success);
        assert!(outcome.run.results["after"].success());
        let failures = tracker.get_failures("p");
        assert_eq!(failures.len(), 1);
        assert!(failures[0].error.contains("kaboom"), "{}", failures[0].error);
        assert_eq!(tracker.get_errors("p")[0].stack.as_deref(), Some("kaboom"));
    }

    #[tokio::test]
    async fn critical_failure_enters_error_only_once_retries_are_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let tracker = Arc::new(StatusTracker::new());
        let phases = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&phases);
        tracker.subscribe("p", move |s| sink.lock().unwrap().push(s.phase));

        let runner = PipelineRunner::new(Arc::clone(&tracker))
            .with_recoveries(RecoveryRegistry::new().with(
                "install-dependencies",
                RecoveryAction::new(|| async { Ok(()) }),
            ));
        let set = OperationSet::new().with(
            Operation::new("install-dependencies", failing_until(Arc::clone(&calls), 5))
                .in_phase(Phase::DependencyInstall)
                .with_retries(1),
        );

        let outcome = runner.execute("p", set).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let errors = tracker.get_errors("p");
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].details["retrying"], true);
        assert_eq!(errors[1].details["retrying"], false);

        let phases = phases.lock().unwrap();
        let first_error = phases.iter().position(|p| *p == Phase::Error).unwrap();
        assert!(phases[first_error..].iter().all(|p| *p == Phase::Error), "{phases:?}");
        assert_eq!(errors[1].phase, Phase::DependencyInstall);
    }

    #[tokio::test]
    async fn zero_concurrency_is_rejected_and_reported() {
        let tracker = Arc::new(StatusTracker::new());
        let runner = PipelineRunner::new(Arc::clone(&tracker)).with_max_concurrency(0);
        let set = OperationSet::new().with(Operation::new("a", OperationWork::noop()));

        let err = runner.execute("p", set).await.unwrap_err();

        assert!(matches!(err, PipelineError::ConfigError(_)));
        assert_eq!(tracker.get_status("p").unwrap().phase, Phase::Error);
        assert_eq!(tracker.get_metrics("p").unwrap().critical_count, 1);
    }
}
