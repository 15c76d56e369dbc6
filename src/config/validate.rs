// src/config/validate.rs

use std::collections::HashSet;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::dag::graph::validate_edges;
use crate::errors::{PipelineError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = PipelineError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.pipeline, raw.operation))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_operations(cfg)?;
    validate_pipeline_section(cfg)?;
    validate_operation_graph(cfg)?;
    Ok(())
}

fn ensure_has_operations(cfg: &RawConfigFile) -> Result<()> {
    if cfg.operation.values().all(|op| !op.enabled) {
        return Err(PipelineError::ConfigError(
            "config must contain at least one enabled [operation.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_pipeline_section(cfg: &RawConfigFile) -> Result<()> {
    if cfg.pipeline.id.trim().is_empty() {
        return Err(PipelineError::ConfigError(
            "[pipeline].id must not be empty".to_string(),
        ));
    }
    if cfg.pipeline.max_concurrency == 0 {
        return Err(PipelineError::ConfigError(
            "[pipeline].max_concurrency must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_operation_graph(cfg: &RawConfigFile) -> Result<()> {
    let skipped: HashSet<&str> = cfg
        .operation
        .iter()
        .filter(|(_, op)| !op.enabled)
        .map(|(id, _)| id.as_str())
        .collect();

    validate_edges(
        cfg.operation
            .iter()
            .filter(|(_, op)| op.enabled)
            .map(|(id, op)| (id.as_str(), op.after.as_slice())),
        &skipped,
    )
}
