// src/exec/observer.rs

//! Observer seam between the executor and whatever tracks its progress.
//!
//! The executor calls these hooks synchronously from its coordinator loop,
//! so an observer sees admissions and settlements in exactly the order the
//! executor processed them. Production code plugs in the pipeline runner's
//! tracker adapter; tests can record events or use `()`.

use crate::dag::{Operation, OperationResult, RunProgress};
use crate::types::OperationId;

pub trait RunObserver: Send {
    /// An operation was admitted and is about to be launched.
    fn operation_admitted(&mut self, _operation: &Operation, _progress: RunProgress) {}

    /// An operation settled and its result was recorded.
    fn operation_settled(
        &mut self,
        _operation: &Operation,
        _result: &OperationResult,
        _progress: RunProgress,
    ) {
    }

    /// Admission stopped (cancellation) with these operations still pending.
    fn admission_stopped(&mut self, _pending: &[OperationId]) {}
}

/// Observer that ignores everything.
impl RunObserver for () {}
