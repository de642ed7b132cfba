//! Admission control for generation sessions.
//!
//! Each running generation holds a [`SessionSlot`]. The slot is moved into
//! the generation worker, so capacity is returned only once the model has
//! actually stopped, not when the HTTP response finishes.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;
use uuid::Uuid;

/// Limits how many generations may run at once.
#[derive(Debug)]
pub struct SessionLimiter {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
}

/// Proof of admission. Dropping it frees the slot.
#[derive(Debug)]
pub struct SessionSlot {
    id: Uuid,
    _permit: OwnedSemaphorePermit,
}

impl SessionSlot {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for SessionSlot {
    fn drop(&mut self) {
        debug!(session_id = %self.id, "Session slot released");
    }
}

impl SessionLimiter {
    pub fn new(max_concurrent: usize) -> Arc<Self> {
        let max_concurrent = max_concurrent.max(1);
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
        })
    }

    /// Take a slot without waiting. `None` means the server is saturated.
    pub fn try_acquire(&self) -> Option<SessionSlot> {
        let permit = self.permits.clone().try_acquire_owned().ok()?;
        let id = Uuid::new_v4();
        debug!(session_id = %id, active = self.active_count(), "Session slot acquired");
        Some(SessionSlot { id, _permit: permit })
    }

    pub fn active_count(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }
}
