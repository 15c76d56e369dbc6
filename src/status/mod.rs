// src/status/mod.rs

//! Pipeline status tracking.
//!
//! - [`phase`] is the coarse state machine (`initializing` → … →
//!   `completed`, with `error` reachable from any non-terminal phase).
//! - [`model`] holds the status, error and report records.
//! - [`tracker`] keeps those records per pipeline and notifies subscribers.

pub mod model;
pub mod phase;
pub mod tracker;

pub use model::{BuildError, BuildStatus, ErrorReport, FailedOperation, UpdateOutcome};
pub use phase::{Phase, PhaseTransition};
pub use tracker::{StatusCallback, StatusTracker, Subscription};
