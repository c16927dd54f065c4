use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::service::ApprovalService;

/// Runs `ApprovalService::sweep` every `interval` until `cancel` fires.
pub fn spawn_timeout_sweeper(
    service: Arc<ApprovalService>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            event_name = "scheduler.sweeper.started",
            interval_ms = interval.as_millis() as u64,
            "timeout sweeper started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match service.sweep().await {
                        Ok(0) => {}
                        Ok(applied) => debug!(
                            event_name = "scheduler.sweeper.fired",
                            applied,
                            "due timeouts applied"
                        ),
                        Err(error) => warn!(
                            event_name = "scheduler.sweeper.failed",
                            error = %error,
                            "timeout sweep failed"
                        ),
                    }
                }
                _ = cancel.cancelled() => {
                    info!(event_name = "scheduler.sweeper.stopped", "timeout sweeper stopped");
                    break;
                }
            }
        }
    })
}
