//! Per-connection dispatch loop.
//!
//! The pumps never touch client state; they forward [`TransportEvent`]s
//! here, and this single task applies them in order.

use std::sync::{Arc, Weak};

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use linkmate_protocol::constants::{
    DEFAULT_AUTH_INVALID_MESSAGE, EVENT_CALL_SERVICE, EVENT_SERVICE_CALL, EVENT_STATE_CHANGED,
};
use linkmate_protocol::{EntityState, EventPayload, InboundMessage, ResultError, ServiceCallEvent};

use crate::client::Inner;
use crate::error::CancelCause;
use crate::pumps::ping::ping_pump;
use crate::session::{ResultRoute, Session};
use crate::subscription::SubscriptionAck;
use crate::synthesis::VirtualEntities;
use crate::transport::TransportEvent;
use crate::types::ConnectionState;

/// Subscription rounds a connection may start before a rejection from the
/// hub drops it and leaves the retry to the reconnect delay.
const MAX_SUBSCRIBE_ROUNDS: u64 = 2;

pub(crate) async fn run(
    inner: Weak<Inner>,
    session: Arc<Session>,
    mut events: mpsc::Receiver<TransportEvent>,
) {
    let cancel = session.cancel_token().clone();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };

        match event {
            Some(TransportEvent::Opened) => inner.on_opened(&session).await,
            Some(TransportEvent::Text(text)) => match InboundMessage::parse(&text) {
                Ok(msg) => inner.handle_frame(&session, msg).await,
                Err(e) => warn!(error = %e, "dropping malformed frame"),
            },
            Some(terminal) => {
                let reason = terminal.close_reason().unwrap_or_default();
                inner.connection_lost(&session, reason).await;
                break;
            }
            None => {
                inner
                    .connection_lost(&session, "transport stopped".into())
                    .await;
                break;
            }
        }
    }

    trace!(generation = session.generation(), "dispatcher stopped");
}

impl Inner {
    /// Applies `state` only if `session` is still the current connection.
    async fn transition(&self, session: &Arc<Session>, state: ConnectionState) -> bool {
        let slot = self.slot.lock().await;
        if !slot.is_current(session) {
            return false;
        }
        self.set_state(state);
        true
    }

    async fn on_opened(&self, session: &Arc<Session>) {
        debug!(generation = session.generation(), "socket open, awaiting auth_required");
        self.transition(session, ConnectionState::AuthPending).await;
    }

    async fn handle_frame(self: &Arc<Self>, session: &Arc<Session>, msg: InboundMessage) {
        match msg {
            InboundMessage::AuthRequired { ha_version } => {
                debug!(?ha_version, "hub requested authentication");
                match session.send_auth().await {
                    Ok(true) => trace!("credential sent"),
                    Ok(false) => debug!("credential already sent on this connection"),
                    Err(e) => warn!(error = %e, "failed to send credential"),
                }
            }
            InboundMessage::AuthOk { ha_version } => self.on_auth_ok(session, ha_version).await,
            InboundMessage::AuthInvalid { message } => self.on_auth_invalid(session, message).await,
            InboundMessage::Result {
                id,
                success,
                error,
                result,
            } => self.on_result(session, id, success, error, result).await,
            InboundMessage::Pong { id } => {
                if session.on_pong(id) {
                    trace!(id, "keepalive acknowledged");
                }
            }
            InboundMessage::Event { event, .. } => self.on_event(&event),
            InboundMessage::Unknown => trace!("ignoring frame of unknown type"),
        }
    }

    async fn on_auth_ok(&self, session: &Arc<Session>, ha_version: Option<String>) {
        if !self
            .transition(session, ConnectionState::SubscribePending)
            .await
        {
            return;
        }
        info!(?ha_version, "authenticated with hub");
        self.auth_error_tx.send_if_modified(|error| error.take().is_some());
        session.auth().open();

        if let Err(e) = session.subscribe().await {
            warn!(error = %e, "failed to send subscriptions");
        }
    }

    async fn on_auth_invalid(&self, session: &Arc<Session>, message: Option<String>) {
        let message = message
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_AUTH_INVALID_MESSAGE.to_string());

        let mut slot = self.slot.lock().await;
        if !slot.is_current(session) {
            return;
        }
        warn!(%message, "hub rejected the access token, not reconnecting");

        self.auth_failed
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.cancel_reconnect();
        slot.session = None;
        let cancelled = session.shutdown(CancelCause::AuthRejected(message.clone()));
        debug!(cancelled, "closed connection after auth_invalid");

        self.set_status(false);
        self.set_state(ConnectionState::AuthFailed);
        self.auth_error_tx.send_replace(Some(message));
    }

    async fn on_result(
        self: &Arc<Self>,
        session: &Arc<Session>,
        id: u64,
        success: bool,
        error: Option<ResultError>,
        result: Option<serde_json::Value>,
    ) {
        match session.on_result(id, success, error, result) {
            ResultRoute::Subscription(SubscriptionAck::Acked { kind, all_ready }) => {
                debug!(id, ?kind, "subscription acknowledged");
                if all_ready {
                    self.on_ready(session).await;
                }
            }
            ResultRoute::Subscription(SubscriptionAck::Rejected { kind, error }) => {
                warn!(id, ?kind, error = %error, "hub rejected subscription");
                self.on_subscription_rejected(session).await;
            }
            ResultRoute::Subscription(SubscriptionAck::NotOurs) => {}
            ResultRoute::Request { matched } => trace!(id, matched, "result delivered"),
        }
    }

    /// Retries a rejected round in place. Once the connection has used up
    /// its rounds it is treated as lost so the reconnect delay applies.
    async fn on_subscription_rejected(self: &Arc<Self>, session: &Arc<Session>) {
        let round = session.subscription_round();
        if round >= MAX_SUBSCRIBE_ROUNDS {
            self.connection_lost(session, format!("subscriptions rejected {round} times"))
                .await;
            return;
        }
        match session.resubscribe_if_rejected().await {
            Ok(true) => info!(round = round + 1, "re-subscribing after rejection"),
            Ok(false) => trace!("subscription round already replaced"),
            Err(e) => warn!(error = %e, "failed to re-subscribe"),
        }
    }

    async fn on_ready(&self, session: &Arc<Session>) {
        {
            let slot = self.slot.lock().await;
            if !slot.is_current(session) {
                return;
            }
            self.set_state(ConnectionState::Ready);
            self.set_status(true);
        }
        info!(generation = session.generation(), "connection ready");

        if session.try_start_pinger() {
            tokio::spawn(ping_pump(
                session.clone(),
                self.config.ping_period,
                session.cancel_token().clone(),
            ));
        }
    }

    fn on_event(&self, event: &EventPayload) {
        if let Some(state) = route_event(event, &self.config.virtual_entities) {
            trace!(entity_id = %state.entity_id, synthesized = state.is_synthesized(), "publishing state");
            self.publish_update(state);
        }
    }
}

/// Turns an inbound event into the state to publish, if any.
///
/// `state_changed` yields its `new_state` (nothing when the entity was
/// removed). Service calls yield a synthesized state for whitelisted
/// virtual entities.
pub(crate) fn route_event(event: &EventPayload, virtuals: &VirtualEntities) -> Option<EntityState> {
    match event.event_type.as_str() {
        EVENT_STATE_CHANGED => {
            let new_state = event.data.get("new_state").filter(|v| !v.is_null())?;
            serde_json::from_value(new_state.clone())
                .map_err(|e| warn!(error = %e, "malformed state_changed event"))
                .ok()
        }
        EVENT_CALL_SERVICE | EVENT_SERVICE_CALL => {
            let call = ServiceCallEvent::from_event_data(&event.data)
                .map_err(|e| warn!(error = %e, "malformed service call event"))
                .ok()?;
            virtuals.synthesize(&call)
        }
        other => {
            trace!(event_type = other, "ignoring event");
            None
        }
    }
}
