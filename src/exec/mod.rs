// src/exec/mod.rs

//! Async execution layer.
//!
//! - [`executor`] owns the coordinator loop that launches admitted
//!   operations on Tokio tasks and waits for the first one to settle.
//! - [`observer`] provides the `RunObserver` trait the executor reports
//!   admissions and settlements through.

pub mod executor;
pub mod observer;

pub use executor::{Executor, RunResults};
pub use observer::RunObserver;
pub use tokio_util::sync::CancellationToken;
