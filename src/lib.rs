// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod diagnostics;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod report;
pub mod status;
pub mod types;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::load_and_validate;
use crate::dag::{DagGraph, OperationSet};
use crate::diagnostics::RecoveryRegistry;
use crate::pipeline::{
    BuildStep, DEFAULT_MAX_CONCURRENCY, PipelineRunner, ProjectBuildFlags, SimulatedSupplier,
    operation_set_from_config, project_build_pipeline,
};
use crate::status::StatusTracker;

const PROJECT_PIPELINE_ID: &str = "project-build";

/// Everything needed to start one pipeline.
struct PreparedPipeline {
    id: String,
    max_concurrency: usize,
    operations: OperationSet,
    recoveries: RecoveryRegistry,
}

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading (or the built-in project build)
/// - the pipeline runner and status tracker
/// - Ctrl-C handling
/// - report printing
///
/// Returns whether the pipeline succeeded.
pub async fn run(args: CliArgs) -> Result<bool> {
    let prepared = if args.project {
        prepare_project(&args)?
    } else {
        prepare_from_config(&args)?
    };

    if args.dry_run {
        print_dry_run(&prepared)?;
        return Ok(true);
    }

    let tracker = Arc::new(StatusTracker::new());
    let subscription = tracker.subscribe(&prepared.id, |status| {
        info!(
            pipeline = %status.pipeline_id,
            phase = %status.phase,
            progress = status.progress,
            "{}",
            status.message
        );
    });

    let runner = PipelineRunner::new(Arc::clone(&tracker))
        .with_max_concurrency(prepared.max_concurrency)
        .with_recoveries(prepared.recoveries);

    // Ctrl-C → stop admitting new operations.
    {
        let cancel = runner.cancellation_token();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            warn!("Ctrl+C received; letting running operations finish");
            cancel.cancel();
        });
    }

    let outcome = runner.execute(&prepared.id, prepared.operations).await;
    tracker.unsubscribe(&subscription);

    let report = tracker
        .generate_report(&prepared.id)
        .with_context(|| format!("no status recorded for pipeline '{}'", prepared.id))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{report}");
    }

    let outcome = outcome?;
    debug!(
        pipeline = %outcome.pipeline_id,
        efficiency = outcome.metrics.efficiency,
        "run finished"
    );
    Ok(outcome.success)
}

fn prepare_from_config(args: &CliArgs) -> Result<PreparedPipeline> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("failed to load pipeline file '{}'", args.config.display()))?;

    Ok(PreparedPipeline {
        id: cfg.pipeline.id.clone(),
        max_concurrency: args.max_concurrency.unwrap_or(cfg.pipeline.max_concurrency),
        operations: operation_set_from_config(&cfg),
        recoveries: RecoveryRegistry::new(),
    })
}

fn prepare_project(args: &CliArgs) -> Result<PreparedPipeline> {
    let mut supplier = SimulatedSupplier::new().with_time_scale(args.time_scale);
    for id in &args.fail_step {
        let Some(step) = BuildStep::ALL.into_iter().find(|s| s.id() == id.as_str()) else {
            bail!("unknown build step '{id}' in --fail-step");
        };
        supplier = supplier.failing(step, 1, format!("simulated failure in {id}"));
    }

    let flags = ProjectBuildFlags {
        skip_install: args.skip_install,
        skip_sync: args.skip_sync,
    };
    let (operations, recoveries) = project_build_pipeline(&supplier, flags);

    Ok(PreparedPipeline {
        id: PROJECT_PIPELINE_ID.to_string(),
        max_concurrency: args.max_concurrency.unwrap_or(DEFAULT_MAX_CONCURRENCY),
        operations,
        recoveries,
    })
}

/// Dry-run output: operations in one valid execution order.
fn print_dry_run(prepared: &PreparedPipeline) -> Result<()> {
    let graph = DagGraph::build(&prepared.operations)?;
    let set = &prepared.operations;

    println!("buildpipe dry-run");
    println!("  pipeline.id = {}", prepared.id);
    println!("  pipeline.max_concurrency = {}", prepared.max_concurrency);
    println!(
        "  sequential estimate = {}ms",
        set.sequential_estimate().as_millis()
    );
    println!();

    println!("operations ({}):", set.len());
    for id in graph.topological_order() {
        let Some(op) = set.get(&id) else { continue };
        println!("  - {id}");
        println!(
            "      priority: {}  phase: {}  estimate: {}ms",
            op.priority,
            op.phase,
            op.estimated_duration.as_millis()
        );
        if !op.dependencies.is_empty() {
            println!("      after: {:?}", op.dependencies);
        }
        if op.retries > 0 {
            println!("      retries: {}", op.retries);
        }
        if let Some(timeout) = op.timeout {
            println!("      timeout: {}ms", timeout.as_millis());
        }
    }

    if !set.skipped().is_empty() {
        println!("skipped ({}):", set.skipped().len());
        for skipped in set.skipped() {
            println!(
                "  - {} (~{}ms)",
                skipped.id,
                skipped.estimated_duration.as_millis()
            );
        }
    }

    debug!("dry-run complete (no execution)");
    Ok(())
}
