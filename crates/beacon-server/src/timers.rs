//! Periodic scans — one scheduler drives heartbeat expiry and session
//! inactivity, on the configured interval, until shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use beacon_core::time as clock;

use crate::context::BrokerContext;
use crate::controller;

/// Run the scan loop until the token cancels.
pub async fn run_scans(ctx: Arc<BrokerContext>, cancel: CancellationToken) {
    let period = Duration::from_millis(ctx.config.scan_interval_ms.max(1));
    let mut interval = time::interval(period);
    interval.tick().await; // consume the immediate first tick

    info!(period_ms = ctx.config.scan_interval_ms, "scan loop started");
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now_ms = clock::now_ms();
                let offline = controller::expire_silent_producers(&ctx, now_ms).await;
                let ended = controller::expire_idle_sessions(&ctx, now_ms).await;
                if offline > 0 || ended > 0 {
                    info!(producers_offline = offline, sessions_ended = ended, "scan cycle");
                } else {
                    debug!("scan cycle clean");
                }
            }
            () = cancel.cancelled() => {
                info!("scan loop stopped");
                return;
            }
        }
    }
}
