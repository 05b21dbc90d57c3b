use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Bounded gate limiting simultaneous outbound calls.
///
/// Clones share the same slots. A slot is held by the returned
/// [`ThrottlePermit`] and given back when the permit is dropped, so every exit
/// path (early return, error, panic unwind, task cancellation) releases it.
#[derive(Debug, Clone)]
pub struct Throttle {
    slots: Arc<Semaphore>,
    capacity: usize,
}

#[derive(Debug)]
pub struct ThrottlePermit {
    _permit: OwnedSemaphorePermit,
}

impl Throttle {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait until a slot is free. There is no timeout.
    ///
    /// Only fails once the throttle has been closed.
    pub async fn acquire(&self) -> Result<ThrottlePermit, AcquireError> {
        let permit = Arc::clone(&self.slots).acquire_owned().await?;
        Ok(ThrottlePermit { _permit: permit })
    }

    /// Refuse all further acquisitions; waiters are woken with an error.
    pub fn close(&self) {
        self.slots.close();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held.
    pub fn in_use(&self) -> usize {
        self.capacity - self.slots.available_permits()
    }
}
