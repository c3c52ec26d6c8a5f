//! Periodic cycle runner.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::pipeline::orchestrator::Orchestrator;

/// Run a cycle every `interval` until the returned flag is set or the
/// orchestrator fails.
///
/// Returns the task handle and the shutdown flag.
pub fn spawn_cycle_loop(
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        info!("Cycle runner started, running every {}s", interval.as_secs());

        let mut tick = tokio::time::interval(interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Cycle runner shutting down");
                return;
            }

            match orchestrator.run_cycle().await {
                Ok(exec) => debug!(workflow_id = %exec.id, success = exec.success, "Cycle finished"),
                Err(e) => {
                    error!("Cycle runner stopping: {e}");
                    return;
                }
            }
        }
    });

    (handle, shutdown_flag)
}
