#![allow(dead_code)]

use std::time::Duration;

use buildpipe::dag::Operation;
pub use buildpipe_test_utils::recorder::WorkRecorder;
pub use buildpipe_test_utils::{init_tracing, with_timeout};

pub fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// An operation whose work sleeps for `duration_ms` and records itself.
pub fn recorded(recorder: &WorkRecorder, id: &str, duration_ms: u64, deps: &[&str]) -> Operation {
    let mut op = Operation::new(id, recorder.work(id, ms(duration_ms))).with_estimate(ms(duration_ms));
    for dep in deps {
        op = op.after(*dep);
    }
    op
}

/// Like [`recorded`], but the work fails with `message`.
pub fn recorded_failing(
    recorder: &WorkRecorder,
    id: &str,
    duration_ms: u64,
    deps: &[&str],
    message: &str,
) -> Operation {
    let mut op = Operation::new(id, recorder.failing(id, ms(duration_ms), message))
        .with_estimate(ms(duration_ms));
    for dep in deps {
        op = op.after(*dep);
    }
    op
}
