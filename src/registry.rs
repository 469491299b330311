//! Queue of exchanges waiting for the next agent invocation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::exchange::Exchange;

/// Exchanges captured by one drain, dispatched during one agent invocation.
pub type Batch = Vec<Arc<Exchange>>;

/// Thread-safe collection of not-yet-dispatched exchanges.
///
/// Many producers enqueue; a connected agent drains. The lock is only held
/// for the push or the swap, never across I/O.
#[derive(Debug, Default)]
pub struct Registry {
    queue: Mutex<Vec<Arc<Exchange>>>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Park an exchange until the next drain. Does not wait for dispatch.
    pub fn enqueue(&self, exchange: Arc<Exchange>) {
        debug!(exchange_id = %exchange.id(), path = %exchange.unit().path, "exchange queued");
        self.lock_queue().push(exchange);
    }

    /// Atomically remove and return everything currently queued.
    #[must_use]
    pub fn drain_all(&self) -> Batch {
        std::mem::take(&mut *self.lock_queue())
    }

    /// Number of queued exchanges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock_queue().len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock_queue().is_empty()
    }

    fn lock_queue(&self) -> MutexGuard<'_, Vec<Arc<Exchange>>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
