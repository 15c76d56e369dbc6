use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;
use buildpipe::dag::OperationWork;
use buildpipe::errors::OperationError;

/// When one invocation of an operation started and settled.
#[derive(Debug, Clone, Copy)]
pub struct Span {
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    started: Vec<(String, Instant)>,
    spans: BTreeMap<String, Span>,
    in_flight: usize,
    max_in_flight: usize,
}

/// Hands out fake work that records start/settle instants and tracks how
/// many operations were in flight at once.
#[derive(Debug, Clone, Default)]
pub struct WorkRecorder {
    inner: Arc<Mutex<Inner>>,
}

impl WorkRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Work that sleeps for `duration` and succeeds.
    pub fn work(&self, id: &str, duration: Duration) -> OperationWork {
        self.make(id, duration, None)
    }

    /// Work that sleeps for `duration` and fails with `message`.
    pub fn failing(&self, id: &str, duration: Duration, message: &str) -> OperationWork {
        self.make(id, duration, Some(message.to_string()))
    }

    fn make(&self, id: &str, duration: Duration, failure: Option<String>) -> OperationWork {
        let id = id.to_string();
        let inner = Arc::clone(&self.inner);

        OperationWork::new(move || {
            let id = id.clone();
            let inner = Arc::clone(&inner);
            let failure = failure.clone();
            async move {
                let started = Instant::now();
                {
                    let mut guard = inner.lock().unwrap();
                    guard.started.push((id.clone(), started));
                    guard.in_flight += 1;
                    guard.max_in_flight = guard.max_in_flight.max(guard.in_flight);
                }

                tokio::time::sleep(duration).await;

                {
                    let mut guard = inner.lock().unwrap();
                    guard.in_flight -= 1;
                    guard.spans.insert(
                        id.clone(),
                        Span {
                            started,
                            finished: Instant::now(),
                        },
                    );
                }

                match failure {
                    Some(message) => Err(OperationError::Failed(message)),
                    None => Ok(json!({ "operation": id })),
                }
            }
        })
    }

    /// Ids in the order their work started.
    pub fn start_order(&self) -> Vec<String> {
        let guard = self.inner.lock().unwrap();
        guard.started.iter().map(|(id, _)| id.clone()).collect()
    }

    pub fn span(&self, id: &str) -> Option<Span> {
        self.inner.lock().unwrap().spans.get(id).copied()
    }

    pub fn was_started(&self, id: &str) -> bool {
        self.inner
            .lock()
            .unwrap()
            .started
            .iter()
            .any(|(started, _)| started == id)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.lock().unwrap().max_in_flight
    }
}
