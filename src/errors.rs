// src/errors.rs

//! Crate-wide error types.
//!
//! [`PipelineError`] covers everything that can stop a pipeline run outright
//! (bad configuration, malformed dependency graphs, IO). Failures of
//! individual operations are *not* pipeline errors; they are captured as
//! [`OperationError`] inside an `OperationResult` and never escape the
//! executor.

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Duplicate operation id: {0}")]
    DuplicateOperation(String),

    #[error("operation '{operation}' depends on unknown operation '{dependency}'")]
    UnknownDependency {
        operation: String,
        dependency: String,
    },

    #[error("operation '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Cycle detected in operation graph: {0}")]
    DagCycle(String),

    #[error("unsatisfiable dependencies; operations never became ready: {0:?}")]
    UnsatisfiableDependencies(Vec<String>),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Whether this error describes a malformed operation graph.
    pub fn is_graph_error(&self) -> bool {
        matches!(
            self,
            PipelineError::DuplicateOperation(_)
                | PipelineError::UnknownDependency { .. }
                | PipelineError::SelfDependency(_)
                | PipelineError::DagCycle(_)
                | PipelineError::UnsatisfiableDependencies(_)
        )
    }
}

/// Failure of a single operation's work.
#[derive(Error, Debug, Clone)]
pub enum OperationError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    #[error("operation panicked: {0}")]
    Panicked(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("{0:#}")]
    Other(std::sync::Arc<anyhow::Error>),
}

impl OperationError {
    pub fn failed(message: impl Into<String>) -> Self {
        OperationError::Failed(message.into())
    }
}

impl From<anyhow::Error> for OperationError {
    fn from(err: anyhow::Error) -> Self {
        OperationError::Other(std::sync::Arc::new(err))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PipelineError>;
