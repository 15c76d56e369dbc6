#![allow(dead_code)]

use std::collections::BTreeMap;
use buildpipe::config::{ConfigFile, OperationConfig, PipelineSection, RawConfigFile, SimulateSpec};
use buildpipe::status::Phase;
use buildpipe::types::Priority;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                pipeline: PipelineSection::default(),
                operation: BTreeMap::new(),
            },
        }
    }

    pub fn id(mut self, id: &str) -> Self {
        self.config.pipeline.id = id.to_string();
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.pipeline.max_concurrency = n;
        self
    }

    pub fn with_operation(mut self, id: &str, op: OperationConfig) -> Self {
        self.config.operation.insert(id.to_string(), op);
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `OperationConfig`.
pub struct OperationConfigBuilder {
    op: OperationConfig,
}

impl OperationConfigBuilder {
    pub fn new(estimated_ms: u64) -> Self {
        Self {
            op: OperationConfig {
                priority: Priority::default(),
                estimated_duration_ms: estimated_ms,
                phase: Phase::default(),
                after: vec![],
                enabled: true,
                retries: 0,
                timeout_ms: None,
                simulate: SimulateSpec::default(),
            },
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.op.after.push(dep.to_string());
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.op.priority = priority;
        self
    }

    pub fn phase(mut self, phase: Phase) -> Self {
        self.op.phase = phase;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.op.enabled = false;
        self
    }

    pub fn fails_with(mut self, message: &str) -> Self {
        self.op.simulate.fail = true;
        self.op.simulate.error = Some(message.to_string());
        self
    }

    pub fn build(self) -> OperationConfig {
        self.op
    }
}
