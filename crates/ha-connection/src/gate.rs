//! One-shot completion handle that any number of callers can await.
//!
//! A gate starts pending and settles exactly once, either open or failed.
//! Waiters that arrive after it settled see the outcome immediately.

use tokio::sync::watch;

use crate::error::{CancelCause, HaError};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum GateState {
    Pending,
    Open,
    Failed(HaError),
}

#[derive(Debug)]
pub(crate) struct Gate {
    tx: watch::Sender<GateState>,
}

impl Gate {
    pub(crate) fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Pending);
        Self { tx }
    }

    /// Opens a pending gate. Returns false if it had already settled.
    pub(crate) fn open(&self) -> bool {
        self.settle(GateState::Open)
    }

    /// Fails a pending gate. Returns false if it had already settled.
    pub(crate) fn fail(&self, err: HaError) -> bool {
        self.settle(GateState::Failed(err))
    }

    fn settle(&self, outcome: GateState) -> bool {
        self.tx.send_if_modified(|state| {
            if matches!(state, GateState::Pending) {
                *state = outcome;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn state(&self) -> GateState {
        self.tx.borrow().clone()
    }

    pub(crate) fn is_open(&self) -> bool {
        matches!(*self.tx.borrow(), GateState::Open)
    }

    pub(crate) fn waiter(&self) -> GateWaiter {
        GateWaiter {
            rx: self.tx.subscribe(),
        }
    }
}

/// Await side of a [`Gate`].
pub(crate) struct GateWaiter {
    rx: watch::Receiver<GateState>,
}

impl GateWaiter {
    pub(crate) async fn wait(mut self) -> Result<(), HaError> {
        let settled = self
            .rx
            .wait_for(|state| !matches!(state, GateState::Pending))
            .await
            .map(|state| state.clone());
        match settled {
            Ok(GateState::Open) => Ok(()),
            Ok(GateState::Failed(err)) => Err(err),
            // The gate was dropped while still pending.
            Ok(GateState::Pending) | Err(_) => Err(HaError::Cancelled(CancelCause::Superseded)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn waiters_see_open() {
        let gate = Gate::new();
        let waiter = gate.waiter();
        let handle = tokio::spawn(waiter.wait());
        tokio::task::yield_now().await;
        assert!(gate.open());
        assert_eq!(handle.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn late_waiter_sees_settled_outcome() {
        let gate = Gate::new();
        gate.fail(HaError::Cancelled(CancelCause::UserDisconnected));
        assert_eq!(
            gate.waiter().wait().await,
            Err(HaError::Cancelled(CancelCause::UserDisconnected))
        );
    }

    #[tokio::test]
    async fn settles_once() {
        let gate = Gate::new();
        assert!(gate.open());
        assert!(!gate.fail(HaError::Timeout));
        assert!(gate.is_open());
        assert_eq!(gate.state(), GateState::Open);
    }

    #[tokio::test]
    async fn dropped_gate_cancels_waiters() {
        let gate = Gate::new();
        let waiter = gate.waiter();
        drop(gate);
        let result = tokio::time::timeout(Duration::from_secs(1), waiter.wait())
            .await
            .expect("should not hang");
        assert!(matches!(result, Err(HaError::Cancelled(_))));
    }
}
