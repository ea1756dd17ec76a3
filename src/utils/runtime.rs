use std::{future::Future, time::Duration};

use anyhow::Result;
use tokio::runtime::Runtime;

/// Time blocking tasks get to finish once the main future is done. Reads from stdin can't be
/// cancelled, so the runtime must not wait for them.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

/// The tracker is driven by a single non-reentrant loop, so one thread is all it needs.
pub fn single_thread_runtime() -> Result<Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

/// Runs `future` to completion, then shuts the runtime down without waiting on blocking tasks
/// that are still stuck.
pub fn run_to_completion<F: Future>(runtime: Runtime, future: F) -> F::Output {
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    output
}
