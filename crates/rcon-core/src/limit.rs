//! Admission control for concurrently running work

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A cap on concurrently admitted units of work.
///
/// A limit of zero admits everything. Admission never waits: callers that
/// cannot get a permit are expected to refuse the work immediately.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimit {
    semaphore: Option<Arc<Semaphore>>,
    max: u32,
}

/// Proof of admission; dropping it frees the slot
#[derive(Debug)]
pub struct Admission {
    _permit: Option<OwnedSemaphorePermit>,
}

impl ConcurrencyLimit {
    pub fn new(max: u32) -> Self {
        let semaphore = (max > 0).then(|| Arc::new(Semaphore::new(max as usize)));
        Self { semaphore, max }
    }

    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Try to admit one more unit of work
    pub fn try_admit(&self) -> Option<Admission> {
        match &self.semaphore {
            None => Some(Admission { _permit: None }),
            Some(semaphore) => Arc::clone(semaphore)
                .try_acquire_owned()
                .ok()
                .map(|permit| Admission {
                    _permit: Some(permit),
                }),
        }
    }

    /// Configured maximum, zero meaning unlimited
    pub fn max(&self) -> u32 {
        self.max
    }

    /// Number of units currently admitted, if the limit is bounded
    pub fn in_use(&self) -> Option<u32> {
        self.semaphore
            .as_ref()
            .map(|s| self.max - s.available_permits() as u32)
    }
}
