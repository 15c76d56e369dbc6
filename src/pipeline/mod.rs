// src/pipeline/mod.rs

//! Running operation sets as tracked pipelines.
//!
//! - [`runner`] ties the executor to the status tracker, classifier and
//!   recovery registry.
//! - [`project`] describes the canonical project build.
//! - [`simulate`] provides simulated work for pipeline files and demos.

pub mod project;
pub mod runner;
pub mod simulate;

pub use project::{BuildStep, OperationSupplier, ProjectBuildFlags, project_build_pipeline};
pub use runner::{DEFAULT_MAX_CONCURRENCY, PipelineOutcome, PipelineRunner};
pub use simulate::{SimulatedSupplier, operation_set_from_config, simulated_work};
