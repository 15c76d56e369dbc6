mod common;
use crate::common::{init_tracing, with_timeout};

use std::sync::{Arc, Mutex};

use buildpipe::pipeline::{
    BuildStep, PipelineRunner, ProjectBuildFlags, SimulatedSupplier, project_build_pipeline,
};
use buildpipe::status::{Phase, StatusTracker};

/// Steps sleep for a tenth of their estimate.
fn scaled() -> SimulatedSupplier {
    SimulatedSupplier::new().with_time_scale(0.1)
}

fn runner_for(tracker: &Arc<StatusTracker>, supplier: &SimulatedSupplier, flags: ProjectBuildFlags)
    -> (PipelineRunner, buildpipe::dag::OperationSet)
{
    let (set, recoveries) = project_build_pipeline(supplier, flags);
    let runner = PipelineRunner::new(Arc::clone(tracker)).with_recoveries(recoveries);
    (runner, set)
}

#[tokio::test(start_paused = true)]
async fn full_project_build_follows_the_critical_path() {
    init_tracing();
    let tracker = Arc::new(StatusTracker::new());
    let (runner, set) = runner_for(&tracker, &scaled(), ProjectBuildFlags::default());

    let outcome = with_timeout(runner.execute("proj", set)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.run.results.len(), 7);
    // (100 + 2000 + max(5000, 1000) + 3000 + 500 + 100) / 10
    let wall = outcome.run.wall_clock.as_millis();
    assert!((1_070..1_080).contains(&wall), "wall clock {wall}ms");
    assert_eq!(outcome.metrics.sequential_ms, 11_700);
    assert!(outcome.metrics.concurrency_helped());

    let metrics = tracker.get_metrics("proj").unwrap();
    assert_eq!(metrics.success_rate, 100.0);
    // The install holds the phase while the shorter sync runs beside it.
    let install = metrics.phase_durations_ms[&Phase::DependencyInstall];
    assert!((500..510).contains(&install), "dependency install {install}ms");
    let starting = metrics.phase_durations_ms[&Phase::Starting];
    assert!((300..310).contains(&starting), "starting {starting}ms");
    assert!(metrics.phase_durations_ms.contains_key(&Phase::Running));
}

#[tokio::test(start_paused = true)]
async fn install_failure_is_recovered_and_retried() {
    let tracker = Arc::new(StatusTracker::new());
    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&phases);
    tracker.subscribe("proj", move |s| sink.lock().unwrap().push(s.phase));
    let supplier = scaled().failing(
        BuildStep::InstallDependencies,
        1,
        "npm ERR! network ECONNRESET",
    );
    let (runner, set) = runner_for(&tracker, &supplier, ProjectBuildFlags::default());

    let outcome = with_timeout(runner.execute("proj", set)).await.unwrap();

    assert!(outcome.success);
    let report = tracker.generate_report("proj").unwrap();
    assert_eq!(report.status.phase, Phase::Completed);
    assert_eq!(report.metrics.recovery_attempts, 1);
    assert_eq!(report.metrics.critical_count, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].resolution.as_ref().unwrap().automated);
    assert!(report.failed_operations.is_empty());

    let phases = phases.lock().unwrap();
    assert!(!phases.contains(&Phase::Error), "{phases:?}");
    assert_eq!(phases.last(), Some(&Phase::Completed));
}

#[tokio::test(start_paused = true)]
async fn container_failure_without_retries_fails_the_pipeline() {
    let tracker = Arc::new(StatusTracker::new());
    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&phases);
    tracker.subscribe("proj", move |s| sink.lock().unwrap().push(s.phase));
    let supplier = scaled().failing(
        BuildStep::EnsureContainerRunning,
        5,
        "no such container",
    );
    let (runner, set) = runner_for(&tracker, &supplier, ProjectBuildFlags::default());

    let outcome = with_timeout(runner.execute("proj", set)).await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.run.results.len(), 7, "dependents still run");

    let report = tracker.generate_report("proj").unwrap();
    assert_eq!(report.status.phase, Phase::Error);
    assert_eq!(report.metrics.recovery_attempts, 1);
    assert_eq!(report.metrics.success_rate, 75.0);
    assert_eq!(report.failed_operations.len(), 1);
    assert_eq!(report.failed_operations[0].id, "ensure-container-running");

    let phases = phases.lock().unwrap();
    let entered = phases.iter().position(|p| *p == Phase::Error).unwrap();
    assert!(phases[entered..].iter().all(|p| *p == Phase::Error), "{phases:?}");
}

#[tokio::test(start_paused = true)]
async fn skipped_steps_do_not_run_but_keep_the_estimate() {
    let tracker = Arc::new(StatusTracker::new());
    let flags = ProjectBuildFlags {
        skip_install: true,
        skip_sync: true,
    };
    let (runner, set) = runner_for(&tracker, &scaled(), flags);

    let outcome = with_timeout(runner.execute("proj", set)).await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.run.results.len(), 5);
    assert!(!outcome.run.results.contains_key("install-dependencies"));
    assert_eq!(outcome.metrics.sequential_ms, 11_700);
    // 11_700 - (100 + 2000 + 3000 + 500 + 100) / 10
    assert!(outcome.metrics.time_saved_ms >= 11_000);
    assert_eq!(tracker.get_metrics("proj").unwrap().total_operations, 5);
}
