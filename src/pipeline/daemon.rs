//! Daemon loop: runs a poll cycle on a fixed interval until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::pipeline::poll_cycle::PollCycle;

/// Default polling interval: 10 minutes.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 600;

/// Run `cycle` immediately, then every `interval`, until `shutdown` fires.
///
/// A cycle in progress when shutdown fires stops claiming, lets in-flight
/// actions settle, and releases whatever it did not act on. Cycle-level
/// errors are logged and the loop carries on with the next tick.
pub async fn run_daemon(cycle: Arc<PollCycle>, interval: Duration, shutdown: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "Triage daemon started");

    let mut tick = tokio::time::interval(interval);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cycles: u64 = 0;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }

        cycles += 1;
        match cycle.run_once(&shutdown).await {
            Ok(summary) => info!(cycle = cycles, "{summary}"),
            Err(e) => error!(cycle = cycles, error = %e, "Poll cycle failed"),
        }
    }

    info!(cycles, "Triage daemon stopped");
}

/// Spawn [`run_daemon`] on the runtime.
pub fn spawn_daemon(
    cycle: Arc<PollCycle>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(run_daemon(cycle, interval, shutdown))
}
