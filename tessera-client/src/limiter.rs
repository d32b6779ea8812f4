//! Concurrency limiter for outgoing requests.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Counting limiter on requests in flight.
///
/// Clones share capacity. A capacity of zero means unlimited.
#[derive(Debug, Clone)]
pub struct Limiter {
    slots: Option<Arc<Semaphore>>,
    capacity: usize,
}

/// A held slot. Dropping it returns the slot, on every exit path.
#[derive(Debug)]
pub struct Permit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl Limiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (capacity > 0).then(|| Arc::new(Semaphore::new(capacity))),
            capacity,
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots currently free, or `None` when unlimited.
    pub fn available(&self) -> Option<usize> {
        self.slots.as_ref().map(|s| s.available_permits())
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Permit {
        let permit = match &self.slots {
            // The semaphore is never closed, so acquisition cannot fail.
            Some(slots) => Arc::clone(slots).acquire_owned().await.ok(),
            None => None,
        };
        Permit { _permit: permit }
    }
}
