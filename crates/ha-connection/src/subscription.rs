//! Event subscriptions for one connection.
//!
//! After `auth_ok` the client subscribes to state changes and to service
//! calls. Each round tracks its two handles and a readiness gate that
//! opens only once both have been acknowledged.

use linkmate_protocol::ResultError;
use linkmate_protocol::constants::{EVENT_CALL_SERVICE, EVENT_STATE_CHANGED};

use crate::error::{CancelCause, HaError};
use crate::gate::{Gate, GateState, GateWaiter};

/// Event families the client subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    StateChanged,
    ServiceCall,
}

impl SubscriptionKind {
    pub const ALL: [Self; 2] = [Self::StateChanged, Self::ServiceCall];

    /// Event type sent in `subscribe_events`.
    pub fn event_type(self) -> &'static str {
        match self {
            Self::StateChanged => EVENT_STATE_CHANGED,
            Self::ServiceCall => EVENT_CALL_SERVICE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubscriptionHandle {
    pub(crate) id: u64,
    pub(crate) kind: SubscriptionKind,
    pub(crate) acked: bool,
}

/// Outcome of feeding a `result` frame to the subscription set.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SubscriptionAck {
    /// The id is not one of ours.
    NotOurs,
    /// Acknowledged; `all_ready` is set once every handle is acked.
    Acked {
        kind: SubscriptionKind,
        all_ready: bool,
    },
    /// The hub refused the subscription.
    Rejected {
        kind: SubscriptionKind,
        error: HaError,
    },
}

pub(crate) struct SubscriptionSet {
    handles: Vec<SubscriptionHandle>,
    ready: Gate,
    round: u64,
}

impl SubscriptionSet {
    pub(crate) fn new() -> Self {
        Self {
            handles: Vec::new(),
            ready: Gate::new(),
            round: 0,
        }
    }

    /// Starts a new subscription round. A still-pending previous round is
    /// cancelled so nobody waits on handles that no longer exist.
    pub(crate) fn begin_round(&mut self) -> u64 {
        self.ready
            .fail(HaError::Cancelled(CancelCause::Resubscribing));
        self.handles.clear();
        self.ready = Gate::new();
        self.round += 1;
        self.round
    }

    pub(crate) fn track(&mut self, kind: SubscriptionKind, id: u64) {
        self.handles.retain(|h| h.kind != kind);
        self.handles.push(SubscriptionHandle {
            id,
            kind,
            acked: false,
        });
    }

    pub(crate) fn owns(&self, id: u64) -> bool {
        self.handles.iter().any(|h| h.id == id)
    }

    pub(crate) fn ack(
        &mut self,
        id: u64,
        success: bool,
        error: Option<ResultError>,
    ) -> SubscriptionAck {
        let Some(handle) = self.handles.iter_mut().find(|h| h.id == id) else {
            return SubscriptionAck::NotOurs;
        };
        let kind = handle.kind;

        if !success {
            let (code, message) = error
                .map(|e| (e.code, e.message))
                .unwrap_or_default();
            let message = if message.is_empty() {
                format!("subscription to {} rejected", kind.event_type())
            } else {
                message
            };
            let error = HaError::Request { code, message };
            self.ready.fail(error.clone());
            return SubscriptionAck::Rejected { kind, error };
        }

        handle.acked = true;
        let all_ready = SubscriptionKind::ALL
            .iter()
            .all(|k| self.handles.iter().any(|h| h.kind == *k && h.acked));
        if all_ready {
            self.ready.open();
        }
        SubscriptionAck::Acked { kind, all_ready }
    }

    /// True when the current round settled with a rejection from the hub.
    pub(crate) fn was_rejected(&self) -> bool {
        matches!(self.ready.state(), GateState::Failed(HaError::Request { .. }))
    }

    pub(crate) fn round(&self) -> u64 {
        self.round
    }

    pub(crate) fn waiter(&self) -> GateWaiter {
        self.ready.waiter()
    }

    pub(crate) fn cancel(&mut self, cause: &CancelCause) {
        self.ready.fail(HaError::Cancelled(cause.clone()));
        self.handles.clear();
    }
}
