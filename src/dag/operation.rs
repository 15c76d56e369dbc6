// src/dag/operation.rs

//! Operation descriptors, the work they carry, and their recorded results.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::errors::OperationError;
use crate::status::Phase;
use crate::types::{OperationId, Priority};

/// Boxed future produced by one invocation of an operation's work.
pub type WorkFuture = Pin<Box<dyn Future<Output = Result<Value, OperationError>> + Send>>;

/// Opaque asynchronous unit of work.
///
/// The scheduler never looks inside; it only invokes it and awaits the
/// result. The callable may be invoked more than once when the runner retries
/// an operation after an automated recovery.
#[derive(Clone)]
pub struct OperationWork(Arc<dyn Fn() -> WorkFuture + Send + Sync>);

impl OperationWork {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, OperationError>> + Send + 'static,
    {
        Self(Arc::new(move || Box::pin(f())))
    }

    /// Work that succeeds immediately with `Value::Null`.
    pub fn noop() -> Self {
        Self::new(|| async { Ok(Value::Null) })
    }

    pub fn invoke(&self) -> WorkFuture {
        (self.0)()
    }
}

impl fmt::Debug for OperationWork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("OperationWork(..)")
    }
}

/// One schedulable unit.
#[derive(Debug, Clone)]
pub struct Operation {
    pub id: OperationId,
    pub priority: Priority,
    /// Ordering hint and sequential-time baseline. Never enforced.
    pub estimated_duration: Duration,
    /// Operations that must settle (success or failure) before this one starts.
    pub dependencies: Vec<OperationId>,
    /// Status phase reported while this operation runs.
    pub phase: Phase,
    /// Extra attempts allowed after an automated recovery.
    pub retries: u32,
    /// Hard limit applied by the pipeline runner.
    pub timeout: Option<Duration>,
    pub work: OperationWork,
}

impl Operation {
    pub fn new(id: impl Into<OperationId>, work: OperationWork) -> Self {
        Self {
            id: id.into(),
            priority: Priority::default(),
            estimated_duration: Duration::ZERO,
            dependencies: Vec::new(),
            phase: Phase::default(),
            retries: 0,
            timeout: None,
            work,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimate(mut self, estimated: Duration) -> Self {
        self.estimated_duration = estimated;
        self
    }

    pub fn after(mut self, dependency: impl Into<OperationId>) -> Self {
        self.dependencies.push(dependency.into());
        self
    }

    pub fn in_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// An operation disabled by a configuration flag.
///
/// It never runs and never appears in the results, but its estimate still
/// counts toward the sequential baseline and dependents treat it as settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedOperation {
    pub id: OperationId,
    pub estimated_duration: Duration,
}

/// The full descriptor set submitted for one pipeline run.
#[derive(Debug, Clone, Default)]
pub struct OperationSet {
    operations: Vec<Operation>,
    skipped: Vec<SkippedOperation>,
}

impl OperationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    pub fn with(mut self, operation: Operation) -> Self {
        self.push(operation);
        self
    }

    pub fn skip(&mut self, id: impl Into<OperationId>, estimated_duration: Duration) {
        self.skipped.push(SkippedOperation {
            id: id.into(),
            estimated_duration,
        });
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn operations_mut(&mut self) -> &mut [Operation] {
        &mut self.operations
    }

    pub fn skipped(&self) -> &[SkippedOperation] {
        &self.skipped
    }

    pub fn get(&self, id: &str) -> Option<&Operation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// Number of operations that will actually run.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Sum of all estimates, skipped operations included.
    pub fn sequential_estimate(&self) -> Duration {
        self.operations
            .iter()
            .map(|op| op.estimated_duration)
            .chain(self.skipped.iter().map(|s| s.estimated_duration))
            .sum()
    }

    pub(crate) fn into_parts(self) -> (Vec<Operation>, Vec<SkippedOperation>) {
        (self.operations, self.skipped)
    }
}

/// Tagged outcome of one operation.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(Value),
    Failure(OperationError),
}

/// Immutable record of a settled operation.
///
/// `started_at` and `finished_at` are offsets from the start of the run.
#[derive(Debug, Clone)]
pub struct OperationResult {
    pub id: OperationId,
    pub outcome: Outcome,
    pub duration: Duration,
    pub started_at: Duration,
    pub finished_at: Duration,
}

impl OperationResult {
    pub fn success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    pub fn value(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Success(v) => Some(v),
            Outcome::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&OperationError> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(e) => Some(e),
        }
    }
}
