//! Reconnection supervisor.
//!
//! An unexpected close schedules exactly one reconnect after a fixed delay.
//! A rejected credential or an explicit disconnect suppresses it.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::Ordering;
use std::sync::{Arc, MutexGuard, Weak};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::Inner;
use crate::error::CancelCause;
use crate::session::Session;
use crate::types::ConnectionState;

impl Inner {
    /// Handles the close or failure of `session`.
    ///
    /// Everything pending on it is cancelled with the close reason. Unless
    /// the credential was rejected, the client goes back to `Idle` and a
    /// reconnect is scheduled.
    pub(crate) async fn connection_lost(self: &Arc<Self>, session: &Arc<Session>, reason: String) {
        let mut slot = self.slot.lock().await;
        if !slot.is_current(session) {
            debug!(generation = session.generation(), %reason, "stale connection closed");
            session.shutdown(CancelCause::ConnectionClosed(reason));
            return;
        }
        slot.session = None;

        let cancelled = session.shutdown(CancelCause::ConnectionClosed(reason.clone()));
        warn!(%reason, cancelled, "connection to hub lost");
        self.set_status(false);

        if self.auth_failed.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::AuthFailed);
            return;
        }
        self.set_state(ConnectionState::Idle);
        self.schedule_reconnect();
    }

    /// Schedules a single reconnect unless one is already pending or the
    /// credential was rejected.
    pub(crate) fn schedule_reconnect(self: &Arc<Self>) {
        if self.auth_failed.load(Ordering::SeqCst) {
            debug!("authentication failed, not scheduling reconnect");
            return;
        }

        let mut guard = self.reconnect_guard();
        if guard.as_ref().is_some_and(|token| !token.is_cancelled()) {
            debug!("reconnect already scheduled");
            return;
        }

        let token = self.tasks_token().child_token();
        *guard = Some(token.clone());

        let delay = self.config.reconnect_delay;
        info!(delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::spawn(reconnect_after(Arc::downgrade(self), delay, token));
    }

    /// Cancels a scheduled reconnect. Returns true if one was pending.
    pub(crate) fn cancel_reconnect(&self) -> bool {
        match self.reconnect_guard().take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn reconnect_guard(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.reconnect_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Waits `delay`, then reopens the connection with the last parameters.
///
/// Returns a boxed future to break the recursive type cycle with
/// `Inner::open_session` (which schedules this on a failed open).
fn reconnect_after(
    inner: Weak<Inner>,
    delay: Duration,
    cancel: CancellationToken,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("reconnect cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut slot = inner.slot.lock().await;

        // connect() or disconnect() may have won the race for the lock.
        if cancel.is_cancelled() {
            debug!("reconnect cancelled");
            return;
        }
        inner.reconnect_guard().take();

        if inner.auth_failed.load(Ordering::SeqCst) || slot.params.is_none() {
            return;
        }
        if slot.session.is_some() {
            debug!("already connected, skipping reconnect");
            return;
        }

        info!("reconnecting to hub");
        if let Err(e) = inner.open_session(&mut slot).await {
            warn!(error = %e, "reconnect failed");
        }
    })
}
