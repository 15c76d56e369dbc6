// src/dag/run_state.rs

//! Per-run scheduling state.
//!
//! [`PipelineRun`] is the synchronous, deterministic half of the scheduler:
//! it owns the pending / running / completed sets and decides which
//! operations to admit next. It never awaits anything and never invokes an
//! operation's work, so it can be driven step by step in tests. The async
//! shell that actually launches work lives in `exec::executor`.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info, warn};

use crate::dag::graph::DagGraph;
use crate::dag::operation::{Operation, OperationResult, OperationSet};
use crate::errors::{PipelineError, Result};
use crate::types::OperationId;

/// Where an operation currently is within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Waiting for dependencies or for a free concurrency slot.
    Pending,
    /// Admitted and in flight.
    Running,
    /// Settled with a recorded result (success or failure).
    Completed,
}

/// Snapshot of how far a run has progressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunProgress {
    pub settled: usize,
    pub running: usize,
    pub total: usize,
}

impl RunProgress {
    /// Settled fraction as a percentage in `[0, 100]`.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        self.settled as f64 / self.total as f64 * 100.0
    }
}

/// Mutable aggregate for one invocation of the scheduler.
///
/// The three id sets are disjoint and together always cover every runnable
/// operation of the submitted set.
#[derive(Debug)]
pub struct PipelineRun {
    graph: DagGraph,
    operations: HashMap<OperationId, Operation>,
    pending: BTreeSet<OperationId>,
    running: BTreeSet<OperationId>,
    completed: BTreeMap<OperationId, OperationResult>,
    max_concurrency: usize,
    /// Cleared on cancellation; no new operations are admitted afterwards.
    admitting: bool,
}

impl PipelineRun {
    /// Validate `set` and create the initial run state.
    ///
    /// This is where malformed graphs are rejected, so no operation of an
    /// invalid set is ever admitted.
    pub fn new(set: OperationSet, max_concurrency: usize) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(PipelineError::ConfigError(
                "max_concurrency must be >= 1 (got 0)".to_string(),
            ));
        }

        let graph = DagGraph::build(&set)?;
        let (operations, skipped) = set.into_parts();

        if !skipped.is_empty() {
            debug!(
                skipped = ?skipped.iter().map(|s| s.id.as_str()).collect::<Vec<_>>(),
                "operations disabled by configuration; treating as settled"
            );
        }

        let pending: BTreeSet<OperationId> = operations.iter().map(|op| op.id.clone()).collect();
        let operations = operations
            .into_iter()
            .map(|op| (op.id.clone(), op))
            .collect();

        Ok(Self {
            graph,
            operations,
            pending,
            running: BTreeSet::new(),
            completed: BTreeMap::new(),
            max_concurrency,
            admitting: true,
        })
    }

    pub fn operation(&self, id: &str) -> Option<&Operation> {
        self.operations.get(id)
    }

    pub fn state_of(&self, id: &str) -> Option<OperationState> {
        if self.pending.contains(id) {
            Some(OperationState::Pending)
        } else if self.running.contains(id) {
            Some(OperationState::Running)
        } else if self.completed.contains_key(id) {
            Some(OperationState::Completed)
        } else {
            None
        }
    }

    pub fn progress(&self) -> RunProgress {
        RunProgress {
            settled: self.completed.len(),
            running: self.running.len(),
            total: self.operations.len(),
        }
    }

    pub fn pending_ids(&self) -> Vec<OperationId> {
        self.pending.iter().cloned().collect()
    }

    pub fn completed(&self) -> &BTreeMap<OperationId, OperationResult> {
        &self.completed
    }

    /// Whether every dependency of `id` has settled (success or failure).
    pub fn deps_settled(&self, id: &str) -> bool {
        self.graph
            .dependencies_of(id)
            .iter()
            .all(|dep| self.completed.contains_key(dep))
    }

    /// Pending operations whose dependencies have all settled, sorted by
    /// `(priority desc, estimated_duration asc, id asc)`.
    pub fn ready_set(&self) -> Vec<&Operation> {
        let mut ready: Vec<&Operation> = self
            .pending
            .iter()
            .filter(|id| self.deps_settled(id))
            .filter_map(|id| self.operations.get(id))
            .collect();

        ready.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.estimated_duration.cmp(&b.estimated_duration))
                .then(a.id.cmp(&b.id))
        });
        ready
    }

    /// Move as many ready operations as the free slots allow from pending to
    /// running, returning them in admission order.
    pub fn admit(&mut self) -> Vec<Operation> {
        if !self.admitting {
            return Vec::new();
        }

        let free = self.max_concurrency.saturating_sub(self.running.len());
        if free == 0 {
            return Vec::new();
        }

        let chosen: Vec<OperationId> = self
            .ready_set()
            .into_iter()
            .take(free)
            .map(|op| op.id.clone())
            .collect();

        let mut admitted = Vec::with_capacity(chosen.len());
        for id in chosen {
            self.pending.remove(&id);
            self.running.insert(id.clone());
            if let Some(op) = self.operations.get(&id) {
                debug!(
                    operation = %id,
                    priority = %op.priority,
                    running = self.running.len(),
                    "dependencies settled; admitting operation"
                );
                admitted.push(op.clone());
            }
        }
        admitted
    }

    /// Record the settlement of a running operation.
    ///
    /// Returns `false` (and records nothing) when `result.id` is not
    /// currently running.
    pub fn settle(&mut self, result: OperationResult) -> bool {
        if !self.running.remove(&result.id) {
            warn!(operation = %result.id, "settlement for operation that is not running; ignoring");
            return false;
        }

        debug!(
            operation = %result.id,
            success = result.success(),
            duration_ms = result.duration.as_millis() as u64,
            "operation settled"
        );
        self.completed.insert(result.id.clone(), result);
        true
    }

    /// Stop admitting new operations; in-flight ones may still settle.
    pub fn stop_admitting(&mut self) {
        if self.admitting {
            info!(
                pending = self.pending.len(),
                running = self.running.len(),
                "stopping admission of new operations"
            );
            self.admitting = false;
        }
    }

    /// Whether the run has reached its terminal state.
    pub fn is_finished(&self) -> bool {
        self.running.is_empty() && (self.pending.is_empty() || !self.admitting)
    }

    /// Detect a run that can never make progress.
    ///
    /// Nothing ready, nothing running, but operations still pending means the
    /// remaining dependencies can never settle.
    pub fn check_progress(&self) -> Result<()> {
        if self.admitting
            && self.running.is_empty()
            && !self.pending.is_empty()
            && self.ready_set().is_empty()
        {
            return Err(PipelineError::UnsatisfiableDependencies(self.pending_ids()));
        }
        Ok(())
    }

    /// Consume the run, returning the recorded results and the ids that were
    /// never started.
    pub fn into_results(self) -> (BTreeMap<OperationId, OperationResult>, Vec<OperationId>) {
        (self.completed, self.pending.into_iter().collect())
    }
}
