// src/dag/mod.rs

//! Operation descriptors and the pure scheduling core.
//!
//! - [`operation`] holds the descriptor set, the opaque work type and the
//!   recorded results.
//! - [`graph`] validates dependency edges and keeps adjacency lists.
//! - [`run_state`] contains the per-run state machine that decides which
//!   operations are ready and admits them within the concurrency budget.

pub mod graph;
pub mod operation;
pub mod run_state;

pub use graph::DagGraph;
pub use operation::{
    Operation, OperationResult, OperationSet, OperationWork, Outcome, SkippedOperation,
    WorkFuture,
};
pub use run_state::{OperationState, PipelineRun, RunProgress};
