use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("run cancelled")]
    Cancelled,
    #[error("admission limiter closed")]
    Closed,
}

/// Counting gate in front of every port call.
///
/// A permit is held for exactly one fetch and released when dropped, so every
/// exit path (error, panic, cancelled future) gives the slot back.
#[derive(Clone)]
pub struct Admission {
    semaphore: Arc<Semaphore>,
    should_terminate: Arc<AtomicBool>,
}

impl Admission {
    pub fn new(max_concurrent: usize, should_terminate: Arc<AtomicBool>) -> Self {
        Admission {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            should_terminate,
        }
    }

    pub async fn admit(&self) -> Result<OwnedSemaphorePermit, AdmissionError> {
        if self.is_cancelled() {
            return Err(AdmissionError::Cancelled);
        }
        let permit = self.semaphore.clone().acquire_owned().await.map_err(|_| {
            if self.is_cancelled() {
                AdmissionError::Cancelled
            } else {
                AdmissionError::Closed
            }
        })?;
        // the flag may have flipped while we were queued
        if self.is_cancelled() {
            return Err(AdmissionError::Cancelled);
        }
        Ok(permit)
    }

    /// Stops admitting and wakes every queued caller.
    pub fn shut(&self) {
        self.should_terminate.store(true, Ordering::SeqCst);
        self.semaphore.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.should_terminate.load(Ordering::Relaxed)
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
