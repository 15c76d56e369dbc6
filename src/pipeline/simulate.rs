// src/pipeline/simulate.rs

//! Simulated work, used by pipeline files and the `--project` demo.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde_json::json;
use tracing::debug;

use crate::config::{ConfigFile, OperationConfig};
use crate::dag::{Operation, OperationSet, OperationWork};
use crate::diagnostics::RecoveryAction;
use crate::errors::OperationError;
use crate::types::OperationId;

use super::project::{BuildStep, OperationSupplier};

/// Work that sleeps for `duration` and then fails `failures` times before
/// succeeding.
pub fn simulated_work(
    id: impl Into<OperationId>,
    duration: Duration,
    failures: u32,
    error: impl Into<String>,
) -> OperationWork {
    let id = id.into();
    let error = error.into();
    let calls = Arc::new(AtomicU32::new(0));

    OperationWork::new(move || {
        let id = id.clone();
        let error = error.clone();
        let calls = Arc::clone(&calls);
        async move {
            tokio::time::sleep(duration).await;
            let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt <= failures {
                debug!(operation = %id, attempt, "simulated failure");
                return Err(OperationError::Failed(error));
            }
            Ok(json!({ "operation": id, "attempt": attempt, "elapsed_ms": duration.as_millis() as u64 }))
        }
    })
}

/// Turn a validated pipeline file into an operation set.
///
/// Disabled operations become skipped entries.
pub fn operation_set_from_config(cfg: &ConfigFile) -> OperationSet {
    let mut set = OperationSet::new();
    for (id, op) in &cfg.operation {
        if op.enabled {
            set.push(operation_from_config(id, op));
        } else {
            set.skip(id.clone(), op.estimated_duration());
        }
    }
    set
}

fn operation_from_config(id: &str, cfg: &OperationConfig) -> Operation {
    let duration = cfg
        .simulate
        .duration_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| cfg.estimated_duration());
    let failures = if cfg.simulate.fail { u32::MAX } else { 0 };
    let error = cfg
        .simulate
        .error
        .clone()
        .unwrap_or_else(|| format!("{id} failed"));

    let mut op = Operation::new(id, simulated_work(id, duration, failures, error))
        .with_priority(cfg.priority)
        .with_estimate(cfg.estimated_duration())
        .in_phase(cfg.phase)
        .with_retries(cfg.retries);
    if let Some(timeout) = cfg.timeout() {
        op = op.with_timeout(timeout);
    }
    for dep in &cfg.after {
        op = op.after(dep.clone());
    }
    op
}

/// Supplies simulated work for the project build steps.
///
/// Each step sleeps for its estimate multiplied by `time_scale`. Steps
/// registered with [`SimulatedSupplier::failing`] fail a fixed number of
/// times before succeeding. Container and dependency steps get a recovery
/// action that always succeeds.
#[derive(Debug, Clone)]
pub struct SimulatedSupplier {
    time_scale: f64,
    failures: HashMap<BuildStep, (u32, String)>,
}

impl Default for SimulatedSupplier {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            failures: HashMap::new(),
        }
    }
}

impl SimulatedSupplier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_scale(mut self, time_scale: f64) -> Self {
        self.time_scale = if time_scale.is_finite() {
            time_scale.max(0.0)
        } else {
            1.0
        };
        self
    }

    pub fn failing(mut self, step: BuildStep, times: u32, message: impl Into<String>) -> Self {
        self.failures.insert(step, (times, message.into()));
        self
    }

    fn scaled(&self, duration: Duration) -> Duration {
        duration.mul_f64(self.time_scale)
    }
}

impl OperationSupplier for SimulatedSupplier {
    fn work(&self, step: BuildStep) -> OperationWork {
        let (times, message) = self
            .failures
            .get(&step)
            .cloned()
            .unwrap_or_else(|| (0, String::new()));
        simulated_work(step.id(), self.scaled(step.estimated_duration()), times, message)
    }

    fn recovery(&self, step: BuildStep) -> Option<RecoveryAction> {
        let pause = match step {
            BuildStep::EnsureContainerRunning => self.scaled(Duration::from_millis(500)),
            BuildStep::InstallDependencies => self.scaled(Duration::from_millis(1_000)),
            _ => return None,
        };
        Some(RecoveryAction::new(move || async move {
            tokio::time::sleep(pause).await;
            debug!(operation = %step, "simulated recovery finished");
            Ok(())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfigFile;

    #[tokio::test(start_paused = true)]
    async fn simulated_work_fails_then_succeeds() {
        let work = simulated_work("x", Duration::from_millis(10), 1, "nope");
        assert!(work.invoke().await.is_err());
        let value = work.invoke().await.unwrap();
        assert_eq!(value["attempt"], 2);
    }

    #[test]
    fn config_becomes_operation_set() {
        let raw: RawConfigFile = toml::from_str(
            r#"
            [operation.a]
            estimated_duration_ms = 100
            timeout_ms = 50
            [operation.b]
            after = ["a"]
            enabled = false
            estimated_duration_ms = 200
            "#,
        )
        .unwrap();
        let cfg = ConfigFile::try_from(raw).unwrap();
        let set = operation_set_from_config(&cfg);

        assert_eq!(set.len(), 1);
        assert_eq!(set.skipped()[0].id, "b");
        assert_eq!(set.get("a").unwrap().timeout, Some(Duration::from_millis(50)));
        assert_eq!(set.sequential_estimate(), Duration::from_millis(300));
    }
}
