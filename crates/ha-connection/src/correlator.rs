//! Request/response correlation by numeric id.
//!
//! One correlator lives per connection, so ids restart at 1 after every
//! reconnect. A pending entry is removed exactly once: by its result, by
//! an explicit cancel, or by [`Correlator::cancel_all`] on close.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;
use tracing::{debug, trace, warn};

use linkmate_protocol::{EntityState, ResultError};

use crate::error::{CancelCause, HaError};

/// What a successful result for a request is decoded into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExpectedResult {
    /// `get_states`: a list of entity states.
    EntityStates,
    /// Any acknowledgment; the payload is ignored.
    Unit,
}

#[derive(Debug)]
pub(crate) enum ResultPayload {
    EntityStates(Vec<EntityState>),
    Unit,
}

pub(crate) type ResultSender = oneshot::Sender<Result<ResultPayload, HaError>>;
pub(crate) type ResultReceiver = oneshot::Receiver<Result<ResultPayload, HaError>>;

struct PendingRequest {
    expected: ExpectedResult,
    tx: ResultSender,
}

pub(crate) struct Correlator {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, PendingRequest>>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Hands out the next id. Ids are unique and strictly increasing for
    /// the life of this correlator.
    pub(crate) fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) fn register(&self, id: u64, expected: ExpectedResult) -> ResultReceiver {
        let (tx, rx) = oneshot::channel();
        self.pending().insert(id, PendingRequest { expected, tx });
        rx
    }

    /// Completes the pending request `id`. Returns false when nothing was
    /// waiting on it.
    pub(crate) fn resolve(
        &self,
        id: u64,
        outcome: Result<Option<serde_json::Value>, Option<ResultError>>,
    ) -> bool {
        let Some(request) = self.pending().remove(&id) else {
            debug!(id, "result for unknown request id, ignoring");
            return false;
        };

        let completion = match outcome {
            Ok(result) => decode(id, request.expected, result),
            Err(error) => {
                let error = error.unwrap_or_else(|| ResultError {
                    code: String::new(),
                    message: String::new(),
                });
                let message = if error.message.is_empty() {
                    format!("Unknown error for id: {id}")
                } else {
                    error.message
                };
                Err(HaError::Request {
                    code: error.code,
                    message,
                })
            }
        };

        if request.tx.send(completion).is_err() {
            trace!(id, "requester went away before its result arrived");
        }
        true
    }

    /// Removes a single pending request without completing it.
    pub(crate) fn cancel(&self, id: u64) -> bool {
        self.pending().remove(&id).is_some()
    }

    /// Fails every pending request with `cause` and returns how many there were.
    pub(crate) fn cancel_all(&self, cause: &CancelCause) -> usize {
        let drained: Vec<(u64, PendingRequest)> = self.pending().drain().collect();
        let count = drained.len();
        for (_, request) in drained {
            let _ = request.tx.send(Err(HaError::Cancelled(cause.clone())));
        }
        count
    }

    pub(crate) fn len(&self) -> usize {
        self.pending().len()
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<u64, PendingRequest>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn decode(
    id: u64,
    expected: ExpectedResult,
    result: Option<serde_json::Value>,
) -> Result<ResultPayload, HaError> {
    match expected {
        ExpectedResult::Unit => Ok(ResultPayload::Unit),
        ExpectedResult::EntityStates => match result {
            None | Some(serde_json::Value::Null) => Ok(ResultPayload::EntityStates(Vec::new())),
            Some(value) => serde_json::from_value(value)
                .map(ResultPayload::EntityStates)
                .map_err(|e| {
                    warn!(id, error = %e, "malformed entity state list");
                    HaError::Protocol(e.to_string())
                }),
        },
    }
}

/// Removes its pending entry on drop unless disarmed. Keeps the pending
/// set clean when a caller stops awaiting a request.
pub(crate) struct PendingGuard<'a> {
    correlator: &'a Correlator,
    id: u64,
    armed: bool,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(correlator: &'a Correlator, id: u64) -> Self {
        Self {
            correlator,
            id,
            armed: true,
        }
    }

    pub(crate) fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.correlator.cancel(self.id);
        }
    }
}
