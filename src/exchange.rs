//! A single pending unit of work and its one eventual outcome.
//!
//! An [`Exchange`] is created by a caller, parked in the
//! [`Registry`](crate::registry::Registry), dispatched by the coordinator,
//! and settled exactly once: by a reply, by a failure, or by the caller's
//! deadline. Whichever settles it first wins; every later attempt is a
//! logged no-op.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::models::{Reply, WorkUnit};
use crate::{AppError, Result};

/// Lifecycle of an exchange's outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeState {
    /// No outcome yet.
    Open,
    /// The agent's reply was delivered.
    Resolved,
    /// A failure or the caller's deadline ended the exchange.
    Abandoned,
}

impl OutcomeState {
    /// Whether the state is final.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

type Outcome = Result<Reply>;

#[derive(Debug)]
struct Slot {
    state: OutcomeState,
    tx: Option<oneshot::Sender<Outcome>>,
    rx: Option<oneshot::Receiver<Outcome>>,
}

/// One request awaiting a reply from the agent.
#[derive(Debug)]
pub struct Exchange {
    id: String,
    unit: WorkUnit,
    slot: Mutex<Slot>,
}

impl Exchange {
    /// Create an open exchange wrapping `unit`.
    #[must_use]
    pub fn new(unit: WorkUnit) -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            unit,
            slot: Mutex::new(Slot {
                state: OutcomeState::Open,
                tx: Some(tx),
                rx: Some(rx),
            }),
        }
    }

    /// Process-unique identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The unit of work to send to the agent.
    #[must_use]
    pub fn unit(&self) -> &WorkUnit {
        &self.unit
    }

    /// Current outcome state.
    #[must_use]
    pub fn state(&self) -> OutcomeState {
        self.lock_slot().state
    }

    /// Settle the exchange with the agent's reply.
    ///
    /// Returns `false` (and changes nothing) if the exchange was already
    /// terminal.
    pub fn resolve_success(&self, reply: Reply) -> bool {
        self.settle(Ok(reply))
    }

    /// Settle the exchange with a failure.
    ///
    /// Returns `false` (and changes nothing) if the exchange was already
    /// terminal.
    pub fn resolve_failure(&self, err: AppError) -> bool {
        self.settle(Err(err))
    }

    /// Wait until the exchange is settled or `deadline` elapses.
    ///
    /// If the deadline wins, the exchange is forced to
    /// [`OutcomeState::Abandoned`] and any later resolution is discarded.
    ///
    /// # Errors
    ///
    /// - [`AppError::DeadlineExceeded`] if `deadline` elapsed first.
    /// - [`AppError::AlreadyConsumed`] if the outcome was already awaited.
    /// - Whatever failure the exchange was resolved with.
    pub async fn await_outcome(&self, deadline: Duration) -> Result<Reply> {
        let Some(mut rx) = self.lock_slot().rx.take() else {
            return Err(AppError::AlreadyConsumed(format!(
                "outcome of exchange {} already awaited",
                self.id
            )));
        };

        match tokio::time::timeout(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(AppError::Transport(format!(
                "exchange {} dropped without an outcome",
                self.id
            ))),
            Err(_) => {
                let mut slot = self.lock_slot();
                if slot.state == OutcomeState::Open {
                    slot.state = OutcomeState::Abandoned;
                    slot.tx = None;
                    debug!(exchange_id = %self.id, "deadline exceeded, exchange abandoned");
                    return Err(AppError::DeadlineExceeded);
                }
                drop(slot);

                // Settled between the timer firing and taking the lock; the
                // outcome is already in the channel.
                rx.try_recv()
                    .unwrap_or_else(|_| Err(AppError::DeadlineExceeded))
            }
        }
    }

    fn settle(&self, outcome: Outcome) -> bool {
        let mut slot = self.lock_slot();
        if slot.state.is_terminal() {
            warn!(
                exchange_id = %self.id,
                state = ?slot.state,
                "exchange already settled, dropping late outcome"
            );
            return false;
        }

        slot.state = if outcome.is_ok() {
            OutcomeState::Resolved
        } else {
            OutcomeState::Abandoned
        };

        if let Some(tx) = slot.tx.take() {
            if tx.send(outcome).is_err() {
                debug!(exchange_id = %self.id, "caller stopped waiting before the outcome arrived");
            }
        }
        true
    }

    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
