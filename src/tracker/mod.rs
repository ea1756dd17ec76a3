//! The tracker proper. [session_timer] measures, [controller] decides when time becomes durable,
//! [storage] keeps it, and [runner] drives everything from host events.

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use controller::TrackerController;
use runner::{LifecycleEvent, TrackingModule};
use storage::{HistoryBound, JsonHistoryStore};
use tokio::{io::AsyncBufRead, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::{
    host_api::{line_protocol::feed_host_lines, HostFeed},
    utils::clock::{Clock, DefaultClock},
};

pub mod controller;
pub mod error;
pub mod runner;
pub mod session_timer;
pub mod shutdown;
pub mod storage;

const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Tracks documents announced on `input` (see [crate::host_api::line_protocol]) until the input
/// ends or the process is interrupted. Failed lifecycle events are printed to stderr so the host
/// can show them.
pub async fn start_tracking(
    log_path: PathBuf,
    bound: HistoryBound,
    input: impl AsyncBufRead + Unpin,
) -> Result<()> {
    let (sender, receiver) = mpsc::channel::<LifecycleEvent>(16);
    let (feed, handle) = HostFeed::new();
    let (failure_sender, mut failures) = mpsc::unbounded_channel();
    let shutdown_token = CancellationToken::new();

    let module = create_module(log_path, bound, feed, receiver, &shutdown_token, DefaultClock)
        .with_failure_reports(failure_sender);

    let reporter = async move {
        while let Some(failure) = failures.recv().await {
            eprintln!("error: {failure}");
        }
    };

    let host = async {
        let result = tokio::select! {
            result = feed_host_lines(input, handle, sender) => result,
            _ = shutdown_token.cancelled() => Ok(()),
        };
        if let Err(e) = &result {
            warn!("Host input failed {e:?}");
        }
        result
    };

    let tracking = async {
        let result = module.run().await;
        shutdown_token.cancel();
        result
    };

    let (_, _, host_result, tracking_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        reporter,
        host,
        tracking,
    );

    if let Err(host_result) = host_result {
        error!("Host feed got an error {:?}", host_result);
    }
    tracking_result?;
    Ok(())
}

fn create_module(
    log_path: PathBuf,
    bound: HistoryBound,
    feed: HostFeed,
    receiver: mpsc::Receiver<LifecycleEvent>,
    shutdown_token: &CancellationToken,
    clock: impl Clock,
) -> TrackingModule<JsonHistoryStore> {
    let controller = TrackerController::new(JsonHistoryStore::new(log_path), Box::new(clock), bound);
    TrackingModule::new(
        controller,
        Box::new(feed),
        receiver,
        shutdown_token.clone(),
        DEFAULT_TICK_INTERVAL,
    )
}
