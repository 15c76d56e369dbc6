// src/diagnostics/recovery.rs

//! Automated recovery actions, keyed by the operation they repair.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{info, warn};

use crate::errors::OperationError;
use crate::types::OperationId;

pub type RecoveryFuture = Pin<Box<dyn Future<Output = Result<(), OperationError>> + Send>>;

/// An async repair step, e.g. restarting a container.
#[derive(Clone)]
pub struct RecoveryAction(Arc<dyn Fn() -> RecoveryFuture + Send + Sync>);

impl RecoveryAction {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), OperationError>> + Send + 'static,
    {
        Self(Arc::new(move || Box::pin(f())))
    }

    pub fn invoke(&self) -> RecoveryFuture {
        (self.0)()
    }
}

impl fmt::Debug for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RecoveryAction(..)")
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecoveryRegistry {
    actions: HashMap<OperationId, RecoveryAction>,
}

impl RecoveryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operation_id: impl Into<OperationId>, action: RecoveryAction) {
        self.actions.insert(operation_id.into(), action);
    }

    pub fn with(mut self, operation_id: impl Into<OperationId>, action: RecoveryAction) -> Self {
        self.register(operation_id, action);
        self
    }

    pub fn get(&self, operation_id: &str) -> Option<&RecoveryAction> {
        self.actions.get(operation_id)
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run the recovery registered for `operation_id`, if any.
    ///
    /// Returns `None` when nothing is registered, otherwise whether the
    /// recovery succeeded. A failing recovery is logged, never propagated.
    pub async fn attempt(&self, operation_id: &str) -> Option<bool> {
        let action = self.actions.get(operation_id)?;

        info!(operation = %operation_id, "running automated recovery");
        match action.invoke().await {
            Ok(()) => {
                info!(operation = %operation_id, "automated recovery succeeded");
                Some(true)
            }
            Err(err) => {
                warn!(operation = %operation_id, error = %err, "automated recovery failed");
                Some(false)
            }
        }
    }
}
