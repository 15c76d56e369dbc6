// src/report.rs

//! Read-only report snapshots assembled from the status tracker.

use std::fmt;

use serde::Serialize;

use crate::metrics::BuildMetrics;
use crate::status::{BuildError, BuildStatus, FailedOperation, Phase, StatusTracker};

/// Everything known about one pipeline, for display or logging.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub status: BuildStatus,
    pub errors: Vec<BuildError>,
    pub metrics: BuildMetrics,
    /// Every operation that did not succeed, with its error.
    pub failed_operations: Vec<FailedOperation>,
    pub summary: String,
}

impl StatusTracker {
    /// Synchronous snapshot of status, errors and metrics for `pipeline_id`.
    pub fn generate_report(&self, pipeline_id: &str) -> Option<PipelineReport> {
        let status = self.get_status(pipeline_id)?;
        let errors = self.get_errors(pipeline_id);
        let metrics = self.get_metrics(pipeline_id).unwrap_or_default();
        let failed_operations = self.get_failures(pipeline_id);
        let summary = summarize(&status, &metrics, &failed_operations);

        Some(PipelineReport {
            status,
            errors,
            metrics,
            failed_operations,
            summary,
        })
    }
}

fn summarize(status: &BuildStatus, metrics: &BuildMetrics, failures: &[FailedOperation]) -> String {
    let id = &status.pipeline_id;
    let total = metrics.total_operations;

    match status.phase {
        Phase::Completed => {
            let mut summary = format!(
                "Pipeline '{id}' completed: {total} operation(s) succeeded in {}ms",
                metrics.total_duration_ms
            );
            if let Some(op) = &metrics.operation_metrics {
                summary.push_str(&format!(
                    "; efficiency {:.1}% ({}ms saved vs {}ms sequential)",
                    op.efficiency, op.time_saved_ms, op.sequential_ms
                ));
            }
            summary
        }
        Phase::Error if !failures.is_empty() => {
            let listing = failures
                .iter()
                .map(|f| format!("{} ({})", f.id, f.error))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "Pipeline '{id}' failed: {} of {total} operation(s) did not succeed: {listing}",
                failures.len()
            )
        }
        Phase::Error => format!("Pipeline '{id}' failed: {}", status.message),
        phase => format!("Pipeline '{id}' is {phase} ({:.0}%)", status.progress),
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary)?;
        writeln!(
            f,
            "  phase: {}  progress: {:.0}%  success rate: {:.0}%",
            self.status.phase, self.status.progress, self.metrics.success_rate
        )?;

        if let Some(op) = &self.metrics.operation_metrics {
            writeln!(
                f,
                "  sequential: {}ms  concurrent: {}ms  efficiency: {:.1}%",
                op.sequential_ms, op.concurrent_ms, op.efficiency
            )?;
        }

        if !self.metrics.phase_durations_ms.is_empty() {
            let phases = self
                .metrics
                .phase_durations_ms
                .iter()
                .map(|(phase, ms)| format!("{phase}={ms}ms"))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(f, "  phases: {phases}")?;
        }

        if self.metrics.recovery_attempts > 0 {
            writeln!(f, "  recovery attempts: {}", self.metrics.recovery_attempts)?;
        }

        for error in &self.errors {
            write!(
                f,
                "  [{}/{}] {}: {}",
                error.severity,
                error.kind,
                error.operation_id.as_deref().unwrap_or("pipeline"),
                error.message
            )?;
            if let Some(resolution) = &error.resolution {
                write!(f, " -> {}", resolution.description)?;
                if let Some(hint) = &resolution.suggestion {
                    write!(f, " ({hint})")?;
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{ErrorKind, Severity};
    use crate::metrics::OperationMetrics;
    use std::time::Duration;

    #[test]
    fn failed_report_lists_every_failed_operation() {
        let tracker = StatusTracker::new();
        tracker.initialize("p", 3);
        tracker.report_error("p", ErrorKind::Unknown, Severity::Info, "boom");
        tracker.record_failures(
            "p",
            vec![
                FailedOperation {
                    id: "a".into(),
                    error: "boom".into(),
                },
                FailedOperation {
                    id: "c".into(),
                    error: "not started: pipeline cancelled".into(),
                },
            ],
        );
        tracker.complete("p", false, None);

        let report = tracker.generate_report("p").unwrap();
        assert_eq!(report.failed_operations.len(), 2);
        assert!(report.summary.contains("2 of 3"), "{}", report.summary);
        assert!(report.summary.contains("a (boom)"));
        assert!(report.to_string().contains("[info/unknown] pipeline: boom"));
    }

    #[test]
    fn successful_report_mentions_efficiency() {
        let tracker = StatusTracker::new();
        tracker.initialize("p", 3);
        let metrics =
            OperationMetrics::compute(Duration::from_millis(800), Duration::from_millis(700));
        tracker.complete("p", true, Some(metrics));

        let report = tracker.generate_report("p").unwrap();
        assert!(report.summary.contains("efficiency 12.5%"), "{}", report.summary);
        assert!(serde_json::to_string(&report).is_ok());
    }

    #[test]
    fn unknown_pipeline_has_no_report() {
        assert!(StatusTracker::new().generate_report("nope").is_none());
    }
}
