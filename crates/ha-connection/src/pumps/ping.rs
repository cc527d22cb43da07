//! Keepalive pump: periodic protocol-level `ping` frames.
//!
//! A ping still unanswered when the next one is due means the hub stopped
//! responding, even if other frames keep the read pump alive.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::HaError;

use crate::session::Session;

/// Sends a `ping` every `period` until `cancel` fires or the session
/// can no longer send. Started only once the connection is ready.
pub(crate) async fn ping_pump(session: Arc<Session>, period: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                match session.send_ping().await {
                    Ok(id) => debug!(id, "sent keepalive ping"),
                    Err(HaError::Timeout) => {
                        warn!(period_ms = period.as_millis() as u64, "no pong within one keepalive period");
                        session.report_failure("keepalive ping unanswered").await;
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "keepalive stopped");
                        break;
                    }
                }
            }
        }
    }
}
