// src/metrics.rs

//! Sequential-vs-concurrent timing and per-pipeline build metrics.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use crate::status::Phase;

/// Comparison between the summed sequential estimate and the actual wall
/// clock of a concurrent run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OperationMetrics {
    pub sequential_ms: u64,
    pub concurrent_ms: u64,
    /// Negative when the concurrent run was slower than the estimate.
    pub time_saved_ms: i64,
    /// Percentage of the sequential estimate saved. May be negative.
    pub efficiency: f64,
}

impl OperationMetrics {
    pub fn compute(sequential: Duration, wall_clock: Duration) -> Self {
        let sequential_ms = sequential.as_millis() as u64;
        let concurrent_ms = wall_clock.as_millis() as u64;
        Self {
            sequential_ms,
            concurrent_ms,
            time_saved_ms: sequential_ms as i64 - concurrent_ms as i64,
            efficiency: efficiency(sequential, wall_clock),
        }
    }

    /// Whether running concurrently beat the sequential estimate.
    pub fn concurrency_helped(&self) -> bool {
        self.time_saved_ms > 0
    }
}

/// `(sequential - actual) / sequential * 100`.
///
/// A zero estimate yields `0.0`. Slower-than-sequential runs produce a
/// negative value, which is reported as is.
pub fn efficiency(sequential: Duration, actual: Duration) -> f64 {
    let sequential = sequential.as_secs_f64();
    if sequential <= 0.0 {
        return 0.0;
    }
    (sequential - actual.as_secs_f64()) / sequential * 100.0
}

/// Aggregate metrics kept per pipeline by the status tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildMetrics {
    pub total_duration_ms: u64,
    pub phase_durations_ms: BTreeMap<Phase, u64>,
    pub operation_metrics: Option<OperationMetrics>,
    pub total_operations: usize,
    /// Reported errors that are not warnings (critical and info).
    pub error_count: usize,
    pub warning_count: usize,
    pub critical_count: usize,
    pub recovery_attempts: u32,
    pub success_rate: f64,
}

impl BuildMetrics {
    pub fn new(total_operations: usize) -> Self {
        Self {
            total_operations,
            ..Self::default()
        }
    }

    pub(crate) fn add_phase_time(&mut self, phase: Phase, elapsed: Duration) {
        *self.phase_durations_ms.entry(phase).or_default() += elapsed.as_millis() as u64;
    }

    /// `100` on success, otherwise `max(0, 100 - 25 * critical errors)`.
    pub fn success_rate_for(success: bool, critical_count: usize) -> f64 {
        if success {
            100.0
        } else {
            (100.0 - 25.0 * critical_count as f64).max(0.0)
        }
    }
}
