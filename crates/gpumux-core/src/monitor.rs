//! Lease monitor: the background task that reclaims the GPU when a
//! ComfyUI lease expires.
//!
//! The loop only observes and delegates; the actual recovery switch runs
//! through the engine under the same gate as operator-initiated switches.
//! No retries are scheduled: if the recovery fails, the next tick sees the
//! lease still expired and tries again.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::SwitchEngine;

/// Handle to a running lease monitor.
#[derive(Debug)]
pub(crate) struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel the loop and wait for it to wind down.
    pub(crate) async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

/// Spawn the monitor loop. Called once per engine via the monitor slot.
pub(crate) fn spawn(engine: Arc<SwitchEngine>, poll: Duration) -> MonitorHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut ticker = interval(poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(poll_seconds = poll.as_secs(), "lease monitor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    engine.reclaim_expired_lease().await;
                }
                () = token.cancelled() => {
                    debug!("lease monitor cancelled");
                    break;
                }
            }
        }
    });

    MonitorHandle { cancel, task }
}
