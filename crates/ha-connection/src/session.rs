//! State owned by one physical connection.
//!
//! A [`Session`] is created for every socket the client opens and is
//! discarded when that socket closes. Its correlator, authentication gate
//! and subscription set never outlive it, so a reconnect always starts
//! from id 1 with fresh handles.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use linkmate_protocol::{OutboundMessage, ResultError};

use crate::correlator::{Correlator, ExpectedResult, PendingGuard, ResultPayload};
use crate::error::{CancelCause, HaError};
use crate::gate::{Gate, GateWaiter};
use crate::subscription::{SubscriptionAck, SubscriptionKind, SubscriptionSet};
use crate::transport::TransportEvent;

/// Where a `result` frame was delivered.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ResultRoute {
    Subscription(SubscriptionAck),
    Request { matched: bool },
}

pub(crate) struct Session {
    generation: u64,
    access_token: String,
    write_tx: mpsc::Sender<tungstenite::Message>,
    events_tx: mpsc::Sender<TransportEvent>,
    correlator: Correlator,
    auth: Gate,
    auth_sent: AtomicBool,
    subscriptions: Mutex<SubscriptionSet>,
    /// Held from id allocation until the frame is queued, so ids reach the
    /// socket in strictly increasing order.
    send_lock: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
    pinger_started: AtomicBool,
    /// Id of the most recent keepalive ping, 0 before the first one.
    last_ping: AtomicU64,
    request_timeout: Option<Duration>,
}

impl Session {
    pub(crate) fn new(
        generation: u64,
        access_token: String,
        write_tx: mpsc::Sender<tungstenite::Message>,
        events_tx: mpsc::Sender<TransportEvent>,
        cancel: CancellationToken,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            generation,
            access_token,
            write_tx,
            events_tx,
            correlator: Correlator::new(),
            auth: Gate::new(),
            auth_sent: AtomicBool::new(false),
            subscriptions: Mutex::new(SubscriptionSet::new()),
            send_lock: tokio::sync::Mutex::new(()),
            cancel,
            pinger_started: AtomicBool::new(false),
            last_ping: AtomicU64::new(0),
            request_timeout,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn auth(&self) -> &Gate {
        &self.auth
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.correlator.len()
    }

    async fn send(&self, msg: &OutboundMessage) -> Result<(), HaError> {
        if self.is_closed() {
            return Err(HaError::NotConnected);
        }
        let json = msg.to_json()?;
        trace!(kind = msg.kind(), id = ?msg.id(), "queueing frame");
        self.write_tx
            .send(tungstenite::Message::Text(json.into()))
            .await
            .map_err(|_| HaError::Transport("outbound queue closed".into()))
    }

    /// Answers `auth_required`. Returns false if this connection already
    /// sent its credential.
    pub(crate) async fn send_auth(&self) -> Result<bool, HaError> {
        if self.auth_sent.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        self.send(&OutboundMessage::Auth {
            access_token: self.access_token.clone(),
        })
        .await?;
        Ok(true)
    }

    /// Starts a subscription round for every [`SubscriptionKind`].
    pub(crate) async fn subscribe(&self) -> Result<(), HaError> {
        let _guard = self.send_lock.lock().await;
        self.subscribe_locked().await
    }

    /// Starts a new round only if the current one was rejected by the hub.
    /// Concurrent callers observe the same rejection but only the first
    /// one re-subscribes.
    pub(crate) async fn resubscribe_if_rejected(&self) -> Result<bool, HaError> {
        let _guard = self.send_lock.lock().await;
        if !self.subscriptions().was_rejected() {
            return Ok(false);
        }
        self.subscribe_locked().await?;
        Ok(true)
    }

    async fn subscribe_locked(&self) -> Result<(), HaError> {
        let planned: Vec<(SubscriptionKind, u64)> = {
            let mut subs = self.subscriptions();
            let round = subs.begin_round();
            trace!(round, "starting subscription round");
            SubscriptionKind::ALL
                .iter()
                .map(|&kind| {
                    let id = self.correlator.allocate();
                    subs.track(kind, id);
                    (kind, id)
                })
                .collect()
        };

        for (kind, id) in planned {
            debug!(id, event_type = kind.event_type(), "subscribing to events");
            self.send(&OutboundMessage::SubscribeEvents {
                id,
                event_type: kind.event_type().to_string(),
            })
            .await?;
        }
        Ok(())
    }

    /// Number of subscription rounds started on this connection.
    pub(crate) fn subscription_round(&self) -> u64 {
        self.subscriptions().round()
    }

    pub(crate) fn subscription_waiter(&self) -> GateWaiter {
        self.subscriptions().waiter()
    }

    /// Routes a `result` frame to its subscription or pending request.
    pub(crate) fn on_result(
        &self,
        id: u64,
        success: bool,
        error: Option<ResultError>,
        result: Option<serde_json::Value>,
    ) -> ResultRoute {
        {
            let mut subs = self.subscriptions();
            if subs.owns(id) {
                return ResultRoute::Subscription(subs.ack(id, success, error));
            }
        }
        let outcome = if success { Ok(result) } else { Err(error) };
        ResultRoute::Request {
            matched: self.correlator.resolve(id, outcome),
        }
    }

    /// A `pong` frame acknowledges its ping like an empty result.
    pub(crate) fn on_pong(&self, id: u64) -> bool {
        self.correlator.resolve(id, Ok(None))
    }

    /// Sends a request and waits for its result.
    ///
    /// The pending entry is registered before the frame is queued so a fast
    /// reply cannot be missed, and removed again if the caller gives up.
    pub(crate) async fn request(
        &self,
        build: impl FnOnce(u64) -> OutboundMessage,
        expected: ExpectedResult,
    ) -> Result<ResultPayload, HaError> {
        let (id, rx) = {
            let _guard = self.send_lock.lock().await;
            let id = self.correlator.allocate();
            let rx = self.correlator.register(id, expected);
            if let Err(e) = self.send(&build(id)).await {
                self.correlator.cancel(id);
                return Err(e);
            }
            (id, rx)
        };

        let guard = PendingGuard::new(&self.correlator, id);
        let received = match self.request_timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    debug!(id, timeout_ms = limit.as_millis() as u64, "request timed out");
                    return Err(HaError::Timeout);
                }
            },
            None => rx.await,
        };
        guard.disarm();

        received.unwrap_or(Err(HaError::Cancelled(CancelCause::ConnectionClosed(
            "request dropped".into(),
        ))))
    }

    /// Queues a keepalive ping. Its pong is consumed without a waiter.
    ///
    /// Fails with [`HaError::Timeout`] when the previous ping is still
    /// unanswered; its pending entry is dropped and no new ping is sent.
    pub(crate) async fn send_ping(&self) -> Result<u64, HaError> {
        let _guard = self.send_lock.lock().await;
        let previous = self.last_ping.swap(0, Ordering::SeqCst);
        if previous != 0 && self.correlator.cancel(previous) {
            warn!(id = previous, "keepalive ping unanswered");
            return Err(HaError::Timeout);
        }

        let id = self.correlator.allocate();
        drop(self.correlator.register(id, ExpectedResult::Unit));
        if let Err(e) = self.send(&OutboundMessage::Ping { id }).await {
            self.correlator.cancel(id);
            return Err(e);
        }
        self.last_ping.store(id, Ordering::SeqCst);
        Ok(id)
    }

    /// Hands a transport failure to this connection's dispatcher, which
    /// tears the session down and schedules a reconnect.
    pub(crate) async fn report_failure(&self, reason: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        let _ = self
            .events_tx
            .send(TransportEvent::Failed(reason.into()))
            .await;
    }

    /// Returns true the first time it is called for this connection.
    pub(crate) fn try_start_pinger(&self) -> bool {
        !self.pinger_started.swap(true, Ordering::SeqCst)
    }

    /// Tears the session down: stops its tasks, fails both gates and every
    /// pending request with `cause`. Returns the number of requests cancelled.
    pub(crate) fn shutdown(&self, cause: CancelCause) -> usize {
        self.cancel.cancel();
        self.auth.fail(HaError::Cancelled(cause.clone()));
        self.subscriptions().cancel(&cause);
        self.correlator.cancel_all(&cause)
    }

    fn subscriptions(&self) -> MutexGuard<'_, SubscriptionSet> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
