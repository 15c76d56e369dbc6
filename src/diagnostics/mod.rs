// src/diagnostics/mod.rs

//! Error classification and automated recovery.
//!
//! - [`taxonomy`] defines error kinds, severities and resolutions.
//! - [`classifier`] maps a failed operation to a taxonomy entry.
//! - [`recovery`] holds the async recovery actions callers register.

pub mod classifier;
pub mod recovery;
pub mod taxonomy;

pub use classifier::{Classification, ClassificationRule, Classifier, suggestion_for};
pub use recovery::{RecoveryAction, RecoveryRegistry};
pub use taxonomy::{ErrorKind, Resolution, Severity};
