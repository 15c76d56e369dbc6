// src/status/model.rs

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::diagnostics::{ErrorKind, Resolution, Severity};
use crate::status::Phase;
use crate::types::OperationId;

/// Current state of one pipeline as seen by subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildStatus {
    pub pipeline_id: String,
    pub phase: Phase,
    /// Always within `[0, 100]`.
    pub progress: f64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
}

impl BuildStatus {
    pub(crate) fn initial(pipeline_id: &str, total_operations: usize) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            phase: Phase::Initializing,
            progress: 0.0,
            message: format!("Initializing pipeline ({total_operations} operations)"),
            timestamp: Utc::now(),
            details: Value::Null,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// What a caller hands to the tracker when something failed.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub operation_id: Option<OperationId>,
    pub details: Value,
    pub stack: Option<String>,
    pub resolution: Option<Resolution>,
    /// The failing operation will be attempted again, so a critical
    /// severity does not end the pipeline yet.
    pub retrying: bool,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            operation_id: None,
            details: Value::Null,
            stack: None,
            resolution: None,
            retrying: false,
        }
    }

    pub fn for_operation(mut self, operation_id: impl Into<OperationId>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_resolution(mut self, resolution: Option<Resolution>) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn retrying(mut self, retrying: bool) -> Self {
        self.retrying = retrying;
        self
    }
}

/// One recorded failure event. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildError {
    pub id: Uuid,
    pub pipeline_id: String,
    /// Phase the pipeline was in when the error was reported.
    pub phase: Phase,
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_id: Option<OperationId>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    pub timestamp: DateTime<Utc>,
}

impl BuildError {
    pub(crate) fn from_report(pipeline_id: &str, phase: Phase, report: ErrorReport) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline_id: pipeline_id.to_string(),
            phase,
            kind: report.kind,
            severity: report.severity,
            message: report.message,
            operation_id: report.operation_id,
            details: report.details,
            stack: report.stack,
            resolution: report.resolution,
            timestamp: Utc::now(),
        }
    }
}

/// An operation that did not succeed in the final run, for the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedOperation {
    pub id: OperationId,
    pub error: String,
}

/// What happened to a status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// Progress and message were applied but the requested phase was behind
    /// the current one, so the phase was kept.
    PhaseHeld,
    /// The pipeline is already in a terminal phase; nothing was changed.
    RejectedTerminal,
    UnknownPipeline,
}
