use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::PaymentOrchestrator;

/// Runs [`PaymentOrchestrator::expire_stale_pix_payments`] on a fixed interval.
pub fn spawn_expiry_sweeper(
    orchestrator: Arc<PaymentOrchestrator>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = every.as_secs(), "PIX expiry sweeper started");

        loop {
            ticker.tick().await;
            match orchestrator.expire_stale_pix_payments().await {
                Ok(sweep) if sweep.examined > 0 => {
                    info!(
                        examined = sweep.examined,
                        cancelled = sweep.cancelled,
                        settled_by_gateway = sweep.settled_by_gateway,
                        "PIX expiry sweep finished"
                    );
                }
                Ok(_) => debug!("No expired PIX payments"),
                Err(e) => error!(error = %e, "PIX expiry sweep failed"),
            }
        }
    })
}
