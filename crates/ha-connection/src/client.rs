//! Public hub client.
//!
//! [`HaClient`] owns at most one live connection. All mutations of the
//! connection slot (connect, disconnect, reconnect, close handling) happen
//! under a single async lock; outbound calls only take it long enough to
//! clone the current [`Session`].

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard};
use std::task::{Context, Poll};

use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use linkmate_protocol::constants::{DEFAULT_AUTH_INVALID_MESSAGE, websocket_url};
use linkmate_protocol::{Attributes, EntityState, OutboundMessage, StateReport};

use crate::correlator::{ExpectedResult, ResultPayload};
use crate::dispatcher;
use crate::error::{CancelCause, HaError};
use crate::pumps::{read::read_pump, write::write_pump};
use crate::session::Session;
use crate::transport::{Transport, TransportEvent, TungsteniteTransport};
use crate::types::{ClientConfig, ConnectParams, ConnectionState};

/// Capacity of the per-connection queue between the pumps and the dispatcher.
const DISPATCH_QUEUE: usize = 256;

/// The connection slot guarded by [`Inner::slot`].
#[derive(Default)]
pub(crate) struct Slot {
    pub(crate) params: Option<ConnectParams>,
    pub(crate) session: Option<Arc<Session>>,
}

impl Slot {
    pub(crate) fn is_current(&self, session: &Arc<Session>) -> bool {
        self.session
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, session))
    }
}

pub(crate) struct Inner {
    pub(crate) config: ClientConfig,
    transport: Arc<dyn Transport>,
    pub(crate) slot: Mutex<Slot>,
    generation: AtomicU64,
    /// Set by `auth_invalid`; suppresses reconnects until the next connect.
    pub(crate) auth_failed: AtomicBool,
    has_params: AtomicBool,
    pub(crate) reconnect_cancel: std::sync::Mutex<Option<CancellationToken>>,
    /// Parent of every background task; replaced on disconnect.
    tasks: std::sync::Mutex<CancellationToken>,
    state_tx: watch::Sender<ConnectionState>,
    status_tx: watch::Sender<bool>,
    pub(crate) auth_error_tx: watch::Sender<Option<String>>,
    updates_tx: broadcast::Sender<EntityState>,
    snapshots_tx: broadcast::Sender<Arc<Vec<EntityState>>>,
}

impl Inner {
    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = ?*current, to = ?state, "connection state changed");
            *current = state;
            true
        });
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn set_status(&self, connected: bool) {
        self.status_tx.send_if_modified(|current| {
            let changed = *current != connected;
            *current = connected;
            changed
        });
    }

    pub(crate) fn publish_update(&self, state: EntityState) {
        // An error only means nobody is listening right now.
        let _ = self.updates_tx.send(state);
    }

    fn publish_snapshot(&self, states: &[EntityState]) {
        let _ = self.snapshots_tx.send(Arc::new(states.to_vec()));
    }

    pub(crate) fn tasks_token(&self) -> CancellationToken {
        self.tasks_guard().clone()
    }

    /// Cancels every background task and installs a fresh parent token.
    fn reset_tasks(&self) {
        let mut guard = self.tasks_guard();
        guard.cancel();
        *guard = CancellationToken::new();
    }

    fn tasks_guard(&self) -> MutexGuard<'_, CancellationToken> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Opens a new connection for `slot.params`, replacing any current one.
    ///
    /// On a failed open the state returns to `Idle` and a reconnect is
    /// scheduled.
    pub(crate) async fn open_session(
        self: &Arc<Self>,
        slot: &mut Slot,
    ) -> Result<Arc<Session>, HaError> {
        if let Some(old) = slot.session.take() {
            let cancelled = old.shutdown(CancelCause::Superseded);
            debug!(generation = old.generation(), cancelled, "replacing connection");
        }
        let params = slot.params.clone().ok_or(HaError::NotConnected)?;
        let url = websocket_url(&params.base_url);

        self.set_status(false);
        self.set_state(ConnectionState::Connecting);
        info!(%url, "connecting to hub");

        let (sink, stream) = match self.transport.open(&url).await {
            Ok(halves) => halves,
            Err(e) => {
                warn!(%url, error = %e, "connection failed");
                self.set_state(ConnectionState::Idle);
                self.schedule_reconnect();
                return Err(e);
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = self.tasks_token().child_token();
        let (write_tx, write_rx) = mpsc::channel(self.config.outbound_buffer.max(1));
        let (events_tx, events_rx) = mpsc::channel(DISPATCH_QUEUE);

        let session = Arc::new(Session::new(
            generation,
            params.access_token,
            write_tx.clone(),
            events_tx.clone(),
            cancel.clone(),
            self.config.request_timeout,
        ));

        let _ = events_tx.try_send(TransportEvent::Opened);
        tokio::spawn(write_pump(sink, write_rx, events_tx.clone(), cancel.clone()));
        tokio::spawn(read_pump(
            stream,
            events_tx,
            write_tx,
            self.config.liveness_timeout,
            cancel,
        ));
        tokio::spawn(dispatcher::run(
            Arc::downgrade(self),
            session.clone(),
            events_rx,
        ));

        debug!(generation, "connection opened");
        slot.session = Some(session.clone());
        Ok(session)
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.tasks_guard().cancel();
    }
}

/// Client for a home-automation hub's WebSocket API.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct HaClient {
    inner: Arc<Inner>,
}

impl HaClient {
    /// Creates a client that connects over tokio-tungstenite.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(TungsteniteTransport))
    }

    /// Creates a client over a custom [`Transport`].
    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let (status_tx, _) = watch::channel(false);
        let (auth_error_tx, _) = watch::channel(None);
        // Capacity 1: a lagging subscriber skips straight to the newest value.
        let (updates_tx, _) = broadcast::channel(1);
        let (snapshots_tx, _) = broadcast::channel(1);

        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                slot: Mutex::new(Slot::default()),
                generation: AtomicU64::new(0),
                auth_failed: AtomicBool::new(false),
                has_params: AtomicBool::new(false),
                reconnect_cancel: std::sync::Mutex::new(None),
                tasks: std::sync::Mutex::new(CancellationToken::new()),
                state_tx,
                status_tx,
                auth_error_tx,
                updates_tx,
                snapshots_tx,
            }),
        }
    }

    /// Connects to the hub at `base_url` (an `http(s)` or `ws(s)` URL).
    ///
    /// Returns once the socket is open; authentication and subscription
    /// continue in the background. Calling it again with the same URL and
    /// token while a connection is live or being established does nothing.
    /// An open failure is returned and also schedules a reconnect.
    pub async fn connect(&self, base_url: &str, access_token: &str) -> Result<(), HaError> {
        let params = ConnectParams::new(base_url, access_token);
        let mut slot = self.inner.slot.lock().await;

        if slot.params.as_ref() == Some(&params)
            && slot.session.is_some()
            && self.inner.state().is_live()
        {
            debug!("already connected with the same endpoint and credential");
            return Ok(());
        }

        self.inner.cancel_reconnect();
        self.inner.auth_failed.store(false, Ordering::SeqCst);
        self.inner.has_params.store(true, Ordering::SeqCst);
        slot.params = Some(params);

        self.inner.open_session(&mut slot).await.map(|_| ())
    }

    /// Closes the connection with a normal close code and forgets the
    /// endpoint. Pending calls fail with [`CancelCause::UserDisconnected`],
    /// background tasks stop and no reconnect follows.
    pub async fn disconnect(&self) {
        let mut slot = self.inner.slot.lock().await;
        info!("disconnecting from hub");

        self.inner.cancel_reconnect();
        self.inner.set_state(ConnectionState::Closing);
        if let Some(session) = slot.session.take() {
            let cancelled = session.shutdown(CancelCause::UserDisconnected);
            debug!(generation = session.generation(), cancelled, "connection closed");
        }
        slot.params = None;
        self.inner.has_params.store(false, Ordering::SeqCst);
        self.inner.auth_failed.store(false, Ordering::SeqCst);
        self.inner.reset_tasks();
        self.inner.set_status(false);
        self.inner.set_state(ConnectionState::Idle);
    }

    /// Waits until the current connection is authenticated and subscribed.
    pub async fn wait_until_ready(&self) -> Result<(), HaError> {
        self.ready_session().await.map(|_| ())
    }

    /// Fetches every entity state from the hub.
    ///
    /// Waits for authentication and subscription first. Any failure is
    /// logged and yields an empty list.
    pub async fn request_full_state_snapshot(&self) -> Vec<EntityState> {
        self.try_request_full_state_snapshot()
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "state snapshot failed");
                Vec::new()
            })
    }

    /// Like [`request_full_state_snapshot`](Self::request_full_state_snapshot)
    /// but reports the failure.
    pub async fn try_request_full_state_snapshot(&self) -> Result<Vec<EntityState>, HaError> {
        let session = self.ready_session().await?;
        let payload = session
            .request(|id| OutboundMessage::GetStates { id }, ExpectedResult::EntityStates)
            .await?;
        match payload {
            ResultPayload::EntityStates(states) => {
                debug!(count = states.len(), "received state snapshot");
                self.inner.publish_snapshot(&states);
                Ok(states)
            }
            ResultPayload::Unit => Err(HaError::Protocol("expected a list of states".into())),
        }
    }

    /// Calls `domain.service` on `entity_id` and waits for the hub's result.
    ///
    /// `entity_id` is merged into `params` as the `entity_id` key.
    pub async fn call_service(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
        params: Option<Attributes>,
    ) -> Result<(), HaError> {
        let mut service_data = params.unwrap_or_default();
        service_data.insert("entity_id".into(), entity_id.into());

        let session = self.ready_session().await?;
        debug!(domain, service, entity_id, "calling service");
        session
            .request(
                |id| OutboundMessage::CallService {
                    id,
                    domain: domain.to_string(),
                    service: service.to_string(),
                    service_data,
                },
                ExpectedResult::Unit,
            )
            .await
            .map(|_| ())
    }

    /// Runs [`call_service`](Self::call_service) in the background and
    /// returns a handle to observe or abort it. Disconnecting aborts it too.
    pub fn spawn_action(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
        params: Option<Attributes>,
    ) -> ActionHandle {
        let cancel = self.inner.tasks_token().child_token();
        let client = self.clone();
        let (domain, service, entity_id) =
            (domain.to_string(), service.to_string(), entity_id.to_string());

        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => Err(HaError::Cancelled(CancelCause::Aborted)),
                result = client.call_service(&domain, &service, &entity_id, params) => result,
            }
        });
        ActionHandle { handle, cancel }
    }

    /// Fire-and-forget service call.
    ///
    /// Returns true when the call was handed to the background; false when
    /// the client has no endpoint or the hub rejected the credential. The
    /// outcome is only logged.
    pub fn invoke_action(
        &self,
        domain: &str,
        service: &str,
        entity_id: &str,
        params: Option<Attributes>,
    ) -> bool {
        if !self.inner.has_params.load(Ordering::SeqCst) {
            warn!(domain, service, entity_id, "not connected, dropping action");
            return false;
        }
        if self.inner.auth_failed.load(Ordering::SeqCst) {
            warn!(domain, service, entity_id, "authentication failed, dropping action");
            return false;
        }

        let action = self.spawn_action(domain, service, entity_id, params);
        let label = format!("{domain}.{service}");
        let entity_id = entity_id.to_string();
        tokio::spawn(async move {
            match action.await {
                Ok(()) => debug!(service = %label, %entity_id, "action completed"),
                Err(e) => warn!(service = %label, %entity_id, error = %e, "action failed"),
            }
        });
        true
    }

    /// Writes a state for `entity_id` on the hub via `states.set_state`.
    pub async fn try_push_state(&self, entity_id: &str, report: StateReport) -> Result<(), HaError> {
        let mut data = Attributes::new();
        data.insert("state".into(), report.state);
        data.insert("attributes".into(), report.attributes.into());
        self.call_service("states", "set_state", entity_id, Some(data))
            .await
    }

    /// Like [`try_push_state`](Self::try_push_state); failures are logged.
    pub async fn push_state(&self, entity_id: &str, report: StateReport) -> bool {
        match self.try_push_state(entity_id, report).await {
            Ok(()) => true,
            Err(e) => {
                warn!(entity_id, error = %e, "state push failed");
                false
            }
        }
    }

    /// Hub-pushed and synthesized entity states. Slow receivers skip to
    /// the newest value.
    pub fn entity_state_updates(&self) -> broadcast::Receiver<EntityState> {
        self.inner.updates_tx.subscribe()
    }

    /// Every successful full snapshot.
    pub fn entity_snapshots(&self) -> broadcast::Receiver<Arc<Vec<EntityState>>> {
        self.inner.snapshots_tx.subscribe()
    }

    /// True while the connection is ready.
    pub fn connection_status(&self) -> watch::Receiver<bool> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.inner.status_tx.borrow()
    }

    /// Last credential rejection message, cleared on the next `auth_ok`.
    pub fn auth_error(&self) -> watch::Receiver<Option<String>> {
        self.inner.auth_error_tx.subscribe()
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Requests on the current connection still awaiting a result.
    pub async fn pending_request_count(&self) -> usize {
        let slot = self.inner.slot.lock().await;
        slot.session.as_ref().map_or(0, |s| s.pending_len())
    }

    /// Returns the current session once it is authenticated and
    /// subscribed.
    ///
    /// Authentication cancelled by a concurrent reconnect is re-awaited on
    /// the replacement connection, up to `auth_retry_attempts` times. A
    /// subscription round the hub rejected is retried once in place.
    async fn ready_session(&self) -> Result<Arc<Session>, HaError> {
        let max_attempts = self.inner.config.auth_retry_attempts.max(1);
        let mut attempt = 0;

        let session = loop {
            let current = {
                let slot = self.inner.slot.lock().await;
                if slot.params.is_none() {
                    return Err(HaError::NotConnected);
                }
                slot.session.clone()
            };
            if self.inner.auth_failed.load(Ordering::SeqCst) {
                return Err(HaError::Auth(self.auth_error_message()));
            }

            let outcome = match &current {
                Some(session) => session.auth().waiter().wait().await,
                None => Err(HaError::NotConnected),
            };
            match (outcome, current) {
                (Ok(()), Some(session)) => break session,
                (Err(HaError::Cancelled(CancelCause::AuthRejected(message))), _) => {
                    return Err(HaError::Auth(message));
                }
                (Err(e), _) if e.is_retryable() => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        warn!(attempt, error = %e, "giving up waiting for authentication");
                        return Err(e);
                    }
                    debug!(attempt, error = %e, "authentication interrupted, retrying");
                    tokio::time::sleep(self.inner.config.auth_retry_delay).await;
                }
                (Err(e), _) => return Err(e),
                (Ok(()), None) => return Err(HaError::NotConnected),
            }
        };

        match session.subscription_waiter().wait().await {
            Ok(()) => Ok(session),
            Err(HaError::Request { message, .. })
                if !session.is_closed() && session.auth().is_open() =>
            {
                info!(%message, "subscription was rejected, re-subscribing");
                session.resubscribe_if_rejected().await?;
                session.subscription_waiter().wait().await?;
                Ok(session)
            }
            Err(HaError::Cancelled(CancelCause::AuthRejected(message))) => {
                Err(HaError::Auth(message))
            }
            Err(e) => Err(e),
        }
    }

    fn auth_error_message(&self) -> String {
        self.inner
            .auth_error_tx
            .borrow()
            .clone()
            .unwrap_or_else(|| DEFAULT_AUTH_INVALID_MESSAGE.to_string())
    }
}

/// Handle to a service call running in the background.
///
/// Awaiting it yields the call's outcome. Dropping it does not stop the
/// call; use [`ActionHandle::abort`].
pub struct ActionHandle {
    handle: JoinHandle<Result<(), HaError>>,
    cancel: CancellationToken,
}

impl ActionHandle {
    /// Stops the call. If the request was already sent, the hub may still
    /// execute it.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for ActionHandle {
    type Output = Result<(), HaError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.handle)
            .poll(cx)
            .map(|joined| joined.unwrap_or(Err(HaError::Cancelled(CancelCause::Aborted))))
    }
}
