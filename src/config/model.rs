// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::status::Phase;
use crate::types::Priority;

/// Top-level pipeline description as read from a TOML file.
///
/// ```toml
/// [pipeline]
/// id = "preview"
/// max_concurrency = 2
///
/// [operation.install-dependencies]
/// priority = "high"
/// estimated_duration_ms = 500
/// phase = "dependency-install"
/// after = ["ensure-container-running"]
/// ```
///
/// Not validated; convert into [`ConfigFile`] with `TryFrom`.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub pipeline: PipelineSection,

    /// All operations from `[operation.<id>]`, keyed by id.
    #[serde(default)]
    pub operation: BTreeMap<String, OperationConfig>,
}

/// A [`RawConfigFile`] that passed validation.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub pipeline: PipelineSection,
    pub operation: BTreeMap<String, OperationConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        pipeline: PipelineSection,
        operation: BTreeMap<String, OperationConfig>,
    ) -> Self {
        Self {
            pipeline,
            operation,
        }
    }

    /// Operations that will actually run.
    pub fn enabled(&self) -> impl Iterator<Item = (&String, &OperationConfig)> {
        self.operation.iter().filter(|(_, op)| op.enabled)
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_pipeline_id")]
    pub id: String,

    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_pipeline_id() -> String {
    "pipeline".to_string()
}

fn default_max_concurrency() -> usize {
    crate::pipeline::DEFAULT_MAX_CONCURRENCY
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            id: default_pipeline_id(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// `[operation.<id>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationConfig {
    #[serde(default)]
    pub priority: Priority,

    /// Ordering hint and sequential baseline.
    #[serde(default)]
    pub estimated_duration_ms: u64,

    /// Status phase reported while the operation runs.
    #[serde(default)]
    pub phase: Phase,

    /// Dependency list: this operation waits for all operations listed here.
    #[serde(default)]
    pub after: Vec<String>,

    /// `false` keeps the operation in the graph as skipped.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub retries: u32,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// What the simulated work does when the pipeline runs.
    #[serde(default)]
    pub simulate: SimulateSpec,
}

fn default_enabled() -> bool {
    true
}

impl OperationConfig {
    pub fn estimated_duration(&self) -> Duration {
        Duration::from_millis(self.estimated_duration_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// `[operation.<id>.simulate]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulateSpec {
    /// How long the work sleeps. Defaults to the estimate.
    #[serde(default)]
    pub duration_ms: Option<u64>,

    #[serde(default)]
    pub fail: bool,

    /// Error message used when `fail` is set.
    #[serde(default)]
    pub error: Option<String>,
}
