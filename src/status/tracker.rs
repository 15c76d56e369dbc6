// src/status/tracker.rs

//! Per-pipeline status, error and metrics tracking with subscriptions.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::diagnostics::{ErrorKind, Severity};
use crate::metrics::{BuildMetrics, OperationMetrics};
use crate::status::model::{
    BuildError, BuildStatus, ErrorReport, FailedOperation, UpdateOutcome,
};
use crate::status::phase::{Phase, PhaseTransition};

/// Callback invoked with every status change of a pipeline.
pub type StatusCallback = Arc<dyn Fn(&BuildStatus) + Send + Sync>;

/// Handle returned by [`StatusTracker::subscribe`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    pipeline_id: String,
    id: u64,
}

impl Subscription {
    pub fn pipeline_id(&self) -> &str {
        &self.pipeline_id
    }
}

#[derive(Debug)]
struct PipelineRecord {
    status: BuildStatus,
    errors: Vec<BuildError>,
    metrics: BuildMetrics,
    failures: Vec<FailedOperation>,
    started: Instant,
    phase_started: Instant,
    finalized: bool,
}

impl PipelineRecord {
    fn new(pipeline_id: &str, total_operations: usize) -> Self {
        let now = Instant::now();
        Self {
            status: BuildStatus::initial(pipeline_id, total_operations),
            errors: Vec::new(),
            metrics: BuildMetrics::new(total_operations),
            failures: Vec::new(),
            started: now,
            phase_started: now,
            finalized: false,
        }
    }

    /// Move to `next`, accounting the time spent in the previous phase.
    fn enter_phase(&mut self, next: Phase) {
        if self.status.phase == next {
            return;
        }
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.phase_started);
        self.metrics.add_phase_time(self.status.phase, elapsed);
        self.phase_started = now;
        self.status.phase = next;
    }
}

/// Status tracker for any number of pipelines.
///
/// All state is keyed by pipeline id. Reads (`get_status`, `get_errors`,
/// `get_metrics`, reports) are safe to interleave with writes coming from a
/// running pipeline.
///
/// Subscribers of one pipeline are called synchronously, in registration
/// order, after each change. Deliveries for the same pipeline are serialized
/// so every subscriber sees changes in the order they were applied. A
/// panicking subscriber is logged and skipped; the remaining subscribers are
/// still called.
#[derive(Default)]
pub struct StatusTracker {
    records: DashMap<String, PipelineRecord>,
    subscribers: DashMap<String, Vec<(u64, StatusCallback)>>,
    delivery: DashMap<String, Arc<ReentrantMutex<()>>>,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker")
            .field("pipelines", &self.records.len())
            .field("subscribed_pipelines", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create status, error list and metrics for a pipeline.
    ///
    /// Calling it again for the same id starts over; subscribers are kept.
    pub fn initialize(&self, pipeline_id: &str, total_operations: usize) {
        let lock = self.delivery_lock(pipeline_id);
        let _delivery = lock.lock();

        let record = PipelineRecord::new(pipeline_id, total_operations);
        let snapshot = record.status.clone();
        if self.records.insert(pipeline_id.to_string(), record).is_some() {
            debug!(pipeline = %pipeline_id, "re-initializing pipeline status");
        }
        info!(pipeline = %pipeline_id, total_operations, "pipeline status initialized");

        self.notify(&snapshot);
    }

    /// Apply a status change.
    ///
    /// `progress` is clamped to `[0, 100]` and never moves backwards while the
    /// pipeline is running. The phase may move forward or jump to
    /// [`Phase::Error`]; a backward phase is held. Updates after a terminal
    /// phase are rejected and logged.
    pub fn update(
        &self,
        pipeline_id: &str,
        phase: Phase,
        progress: f64,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> UpdateOutcome {
        let lock = self.delivery_lock(pipeline_id);
        let _delivery = lock.lock();

        let snapshot = {
            let Some(mut record) = self.records.get_mut(pipeline_id) else {
                warn!(pipeline = %pipeline_id, "status update for unknown pipeline; ignoring");
                return UpdateOutcome::UnknownPipeline;
            };

            let current = record.status.phase;
            let outcome = match current.transition_to(phase) {
                PhaseTransition::AfterTerminal => {
                    warn!(
                        pipeline = %pipeline_id,
                        current = %current,
                        requested = %phase,
                        "status update after terminal phase; ignoring"
                    );
                    return UpdateOutcome::RejectedTerminal;
                }
                PhaseTransition::Backward => {
                    debug!(
                        pipeline = %pipeline_id,
                        current = %current,
                        requested = %phase,
                        "phase would move backwards; keeping current phase"
                    );
                    UpdateOutcome::PhaseHeld
                }
                PhaseTransition::Forward => {
                    record.enter_phase(phase);
                    UpdateOutcome::Applied
                }
            };

            let progress = clamp_progress(progress).max(record.status.progress);
            record.status.progress = progress;
            record.status.message = message.into();
            record.status.details = details.unwrap_or(Value::Null);
            record.status.timestamp = Utc::now();

            (outcome, record.status.clone())
        };

        let (outcome, status) = snapshot;
        self.notify(&status);
        outcome
    }

    /// Convenience wrapper around [`StatusTracker::report`].
    pub fn report_error(
        &self,
        pipeline_id: &str,
        kind: ErrorKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Option<BuildError> {
        self.report(pipeline_id, ErrorReport::new(kind, severity, message))
    }

    /// Append a [`BuildError`].
    ///
    /// A critical error also forces the pipeline into [`Phase::Error`] with
    /// the error's message, unless it is already terminal or the report is
    /// marked as [`ErrorReport::retrying`].
    pub fn report(&self, pipeline_id: &str, report: ErrorReport) -> Option<BuildError> {
        let lock = self.delivery_lock(pipeline_id);
        let _delivery = lock.lock();

        let (error, forced) = {
            let Some(mut record) = self.records.get_mut(pipeline_id) else {
                warn!(pipeline = %pipeline_id, "error report for unknown pipeline; ignoring");
                return None;
            };

            let retrying = report.retrying;
            let error = BuildError::from_report(pipeline_id, record.status.phase, report);
            match error.severity {
                Severity::Critical => {
                    record.metrics.critical_count += 1;
                    record.metrics.error_count += 1;
                }
                Severity::Warning => record.metrics.warning_count += 1,
                Severity::Info => record.metrics.error_count += 1,
            }
            record.errors.push(error.clone());

            warn!(
                pipeline = %pipeline_id,
                operation = error.operation_id.as_deref().unwrap_or("-"),
                kind = %error.kind,
                severity = %error.severity,
                message = %error.message,
                "build error reported"
            );

            let forced = if error.severity == Severity::Critical
                && !retrying
                && !record.status.is_terminal()
            {
                record.enter_phase(Phase::Error);
                record.status.message = error.message.clone();
                record.status.timestamp = Utc::now();
                Some(record.status.clone())
            } else {
                None
            };

            (error, forced)
        };

        if let Some(status) = forced {
            self.notify(&status);
        }
        Some(error)
    }

    pub fn record_recovery_attempt(&self, pipeline_id: &str) {
        if let Some(mut record) = self.records.get_mut(pipeline_id) {
            record.metrics.recovery_attempts += 1;
        }
    }

    /// Remember which operations did not succeed, for the report.
    pub fn record_failures(&self, pipeline_id: &str, failures: Vec<FailedOperation>) {
        if let Some(mut record) = self.records.get_mut(pipeline_id) {
            record.failures = failures;
        }
    }

    /// Finalize metrics and move to the terminal phase.
    ///
    /// A pipeline that is already terminal keeps its phase; only the final
    /// metrics are rewritten. Returns `false` for an unknown pipeline.
    pub fn complete(
        &self,
        pipeline_id: &str,
        success: bool,
        operation_metrics: Option<OperationMetrics>,
    ) -> bool {
        let lock = self.delivery_lock(pipeline_id);
        let _delivery = lock.lock();

        let snapshot = {
            let Some(mut record) = self.records.get_mut(pipeline_id) else {
                warn!(pipeline = %pipeline_id, "completion for unknown pipeline; ignoring");
                return false;
            };

            if record.finalized {
                warn!(pipeline = %pipeline_id, "pipeline completed twice; overwriting final metrics");
            }

            let terminal = if record.status.is_terminal() {
                let current = record.status.phase;
                let requested = if success { Phase::Completed } else { Phase::Error };
                if current != requested {
                    warn!(
                        pipeline = %pipeline_id,
                        current = %current,
                        requested = %requested,
                        "pipeline already terminal; keeping phase"
                    );
                }
                current
            } else if success {
                Phase::Completed
            } else {
                Phase::Error
            };
            record.enter_phase(terminal);

            if terminal == Phase::Completed {
                record.status.progress = 100.0;
                record.status.message = "Build completed successfully".to_string();
            } else {
                let failed = record.failures.len();
                record.status.message = if failed > 0 {
                    format!("Build failed: {failed} operation(s) did not succeed")
                } else {
                    format!("Build failed with {} error(s)", record.errors.len())
                };
            }
            record.status.timestamp = Utc::now();

            let critical = record.metrics.critical_count;
            record.metrics.success_rate = BuildMetrics::success_rate_for(success, critical);
            if operation_metrics.is_some() {
                record.metrics.operation_metrics = operation_metrics;
            }
            record.metrics.total_duration_ms = record.started.elapsed().as_millis() as u64;
            record.finalized = true;

            info!(
                pipeline = %pipeline_id,
                success,
                errors = record.errors.len(),
                success_rate = record.metrics.success_rate,
                total_ms = record.metrics.total_duration_ms,
                "pipeline completed"
            );

            record.status.clone()
        };

        self.notify(&snapshot);
        true
    }

    /// Register a callback for status changes of `pipeline_id`.
    pub fn subscribe<F>(&self, pipeline_id: &str, callback: F) -> Subscription
    where
        F: Fn(&BuildStatus) + Send + Sync + 'static,
    {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .entry(pipeline_id.to_string())
            .or_default()
            .push((id, Arc::new(callback)));
        debug!(pipeline = %pipeline_id, subscription = id, "status subscriber added");

        Subscription {
            pipeline_id: pipeline_id.to_string(),
            id,
        }
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        let Some(mut subs) = self.subscribers.get_mut(&subscription.pipeline_id) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(id, _)| *id != subscription.id);
        before != subs.len()
    }

    pub fn get_status(&self, pipeline_id: &str) -> Option<BuildStatus> {
        self.records.get(pipeline_id).map(|r| r.status.clone())
    }

    pub fn get_errors(&self, pipeline_id: &str) -> Vec<BuildError> {
        self.records
            .get(pipeline_id)
            .map(|r| r.errors.clone())
            .unwrap_or_default()
    }

    pub fn get_metrics(&self, pipeline_id: &str) -> Option<BuildMetrics> {
        self.records.get(pipeline_id).map(|r| r.metrics.clone())
    }

    pub fn get_failures(&self, pipeline_id: &str) -> Vec<FailedOperation> {
        self.records
            .get(pipeline_id)
            .map(|r| r.failures.clone())
            .unwrap_or_default()
    }

    pub fn is_terminal(&self, pipeline_id: &str) -> bool {
        self.records
            .get(pipeline_id)
            .is_some_and(|r| r.status.is_terminal())
    }

    /// Forget everything about a pipeline, subscribers included.
    pub fn clear(&self, pipeline_id: &str) -> bool {
        let removed = self.records.remove(pipeline_id).is_some();
        self.subscribers.remove(pipeline_id);
        self.delivery.remove(pipeline_id);
        removed
    }

    fn delivery_lock(&self, pipeline_id: &str) -> Arc<ReentrantMutex<()>> {
        Arc::clone(
            self.delivery
                .entry(pipeline_id.to_string())
                .or_default()
                .value(),
        )
    }

    fn notify(&self, status: &BuildStatus) {
        // Clone the callbacks out so no map guard is held while they run.
        let callbacks: Vec<StatusCallback> = match self.subscribers.get(&status.pipeline_id) {
            Some(subs) => subs.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return,
        };

        for (index, callback) in callbacks.iter().enumerate() {
            if catch_unwind(AssertUnwindSafe(|| callback(status))).is_err() {
                warn!(
                    pipeline = %status.pipeline_id,
                    subscriber = index,
                    "status subscriber panicked; continuing with remaining subscribers"
                );
            }
        }
    }
}

fn clamp_progress(progress: f64) -> f64 {
    if progress.is_nan() {
        0.0
    } else {
        progress.clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder(tracker: &StatusTracker, pipeline: &str) -> Arc<Mutex<Vec<BuildStatus>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        tracker.subscribe(pipeline, move |s| sink.lock().unwrap().push(s.clone()));
        seen
    }

    #[test]
    fn progress_is_clamped_and_never_decreases() {
        let tracker = StatusTracker::new();
        tracker.initialize("p", 4);

        tracker.update("p", Phase::Building, 150.0, "over", None);
        assert_eq!(tracker.get_status("p").unwrap().progress, 100.0);

        tracker.initialize("p", 4);
        tracker.update("p", Phase::Building, 60.0, "a", None);
        tracker.update("p", Phase::Building, 20.0, "b", None);
        tracker.update("p", Phase::Building, -5.0, "c", None);
        assert_eq!(tracker.get_status("p").unwrap().progress, 60.0);
    }

    #[test]
    fn backward_phase_is_held_and_terminal_rejects() {
        let tracker = StatusTracker::new();
        tracker.initialize("p", 1);

        assert_eq!(
            tracker.update("p", Phase::Starting, 10.0, "start", None),
            UpdateOutcome::Applied
        );
        assert_eq!(
            tracker.update("p", Phase::ContainerSetup, 20.0, "back", None),
            UpdateOutcome::PhaseHeld
        );
        let status = tracker.get_status("p").unwrap();
        assert_eq!(status.phase, Phase::Starting);
        assert_eq!(status.message, "back");

        assert!(tracker.complete("p", true, None));
        assert_eq!(
            tracker.update("p", Phase::Running, 100.0, "late", None),
            UpdateOutcome::RejectedTerminal
        );
        assert_eq!(tracker.get_status("p").unwrap().phase, Phase::Completed);
    }

    #[test]
    fn critical_error_forces_error_phase() {
        let tracker = StatusTracker::new();
        tracker.initialize("p", 2);
        tracker.update("p", Phase::DependencyInstall, 50.0, "installing", None);

        tracker.report_error("p", ErrorKind::Dependency, Severity::Warning, "slow mirror");
        assert_eq!(tracker.get_status("p").unwrap().phase, Phase::DependencyInstall);

        tracker.report_error("p", ErrorKind::Dependency, Severity::Critical, "npm install failed");
        let status = tracker.get_status("p").unwrap();
        assert_eq!(status.phase, Phase::Error);
        assert_eq!(status.message, "npm install failed");

        let metrics = tracker.get_metrics("p").unwrap();
        assert_eq!(metrics.warning_count, 1);
        assert_eq!(metrics.error_count, 1);
        assert_eq!(tracker.get_errors("p").len(), 2);
        assert_eq!(tracker.get_errors("p")[1].phase, Phase::DependencyInstall);
    }

    #[test]
    fn retrying_critical_error_keeps_the_phase() {
        let tracker = StatusTracker::new();
        tracker.initialize("p", 1);
        tracker.update("p", Phase::DependencyInstall, 10.0, "installing", None);

        let report = ErrorReport::new(ErrorKind::Dependency, Severity::Critical, "npm failed")
            .retrying(true);
        assert!(tracker.report("p", report).is_some());

        assert_eq!(tracker.get_status("p").unwrap().phase, Phase::DependencyInstall);
        assert_eq!(tracker.get_metrics("p").unwrap().critical_count, 1);
    }

    #[test]
    fn complete_never_leaves_a_terminal_phase() {
        let tracker = StatusTracker::new();
        let seen = recorder(&tracker, "p");
        tracker.initialize("p", 1);
        tracker.report_error("p", ErrorKind::Container, Severity::Critical, "gone");

        assert!(tracker.complete("p", true, None));
        let status = tracker.get_status("p").unwrap();
        assert_eq!(status.phase, Phase::Error);
        assert_ne!(status.message, "Build completed successfully");

        let phases: Vec<Phase> = seen.lock().unwrap().iter().map(|s| s.phase).collect();
        assert_eq!(phases.last(), Some(&Phase::Error));
        assert!(!phases.contains(&Phase::Completed));
    }

    #[test]
    fn complete_computes_success_rate_from_critical_errors() {
        let tracker = StatusTracker::new();
        tracker.initialize("p", 3);
        tracker.report_error("p", ErrorKind::Container, Severity::Critical, "a");
        tracker.report_error("p", ErrorKind::Dependency, Severity::Critical, "b");
        tracker.report_error("p", ErrorKind::Unknown, Severity::Info, "c");

        tracker.complete("p", false, None);
        let metrics = tracker.get_metrics("p").unwrap();
        assert_eq!(metrics.success_rate, 50.0);
        assert_eq!(tracker.get_status("p").unwrap().phase, Phase::Error);
    }

    #[test]
    fn subscribers_are_called_in_order_and_isolated_from_panics() {
        let tracker = StatusTracker::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&order);
        tracker.subscribe("p", move |_| first.lock().unwrap().push("first"));
        tracker.subscribe("p", |_| panic!("subscriber bug"));
        let third = Arc::clone(&order);
        tracker.subscribe("p", move |_| third.lock().unwrap().push("third"));

        tracker.initialize("p", 1);
        assert_eq!(*order.lock().unwrap(), vec!["first", "third"]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let tracker = StatusTracker::new();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let sub = tracker.subscribe("p", move |_| *sink.lock().unwrap() += 1);

        tracker.initialize("p", 1);
        assert!(tracker.unsubscribe(&sub));
        assert!(!tracker.unsubscribe(&sub));
        tracker.update("p", Phase::Building, 10.0, "x", None);

        assert_eq!(*seen.lock().unwrap(), 1);
    }

    #[test]
    fn subscribers_only_see_their_pipeline() {
        let tracker = StatusTracker::new();
        let seen = recorder(&tracker, "a");
        tracker.initialize("a", 1);
        tracker.initialize("b", 1);
        tracker.update("b", Phase::Building, 10.0, "other", None);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(seen.iter().all(|s| s.pipeline_id == "a"));
    }

    #[test]
    fn subscriber_may_read_the_tracker() {
        let tracker = Arc::new(StatusTracker::new());
        let reader = Arc::clone(&tracker);
        let phases = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&phases);
        tracker.subscribe("p", move |s| {
            let current = reader.get_status(&s.pipeline_id).map(|c| c.phase);
            sink.lock().unwrap().push(current);
        });

        tracker.initialize("p", 1);
        tracker.update("p", Phase::Running, 50.0, "x", None);
        assert_eq!(
            *phases.lock().unwrap(),
            vec![Some(Phase::Initializing), Some(Phase::Running)]
        );
    }

    #[test]
    fn clear_forgets_the_pipeline() {
        let tracker = StatusTracker::new();
        tracker.initialize("p", 1);
        assert!(tracker.clear("p"));
        assert!(tracker.get_status("p").is_none());
        assert_eq!(
            tracker.update("p", Phase::Building, 1.0, "x", None),
            UpdateOutcome::UnknownPipeline
        );
    }
}
