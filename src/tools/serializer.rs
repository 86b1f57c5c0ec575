//! Call Serializer
//!
//! Single-slot, FIFO gate in front of the rate-limited tool. Waiting for the
//! slot is bounded separately from the work done while holding it, so a stuck
//! holder produces [`ToolError::MutexTimeout`] for waiters instead of a hang.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time;
use tracing::{debug, warn};

use super::error::ToolError;

/// Default bound on waiting for the slot (2 minutes)
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(120);

/// Mutual-exclusion gate for serialized calls
///
/// Cloning shares the same slot.
#[derive(Debug, Clone)]
pub struct CallSerializer {
    /// One permit; tokio's semaphore queues waiters in FIFO order
    slot: Arc<Semaphore>,

    /// Bound on waiting for the permit
    acquire_timeout: Duration,
}

impl Default for CallSerializer {
    fn default() -> Self {
        Self::new(DEFAULT_ACQUIRE_TIMEOUT)
    }
}

impl CallSerializer {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            slot: Arc::new(Semaphore::new(1)),
            acquire_timeout,
        }
    }

    pub fn acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Whether some call currently holds the slot
    pub fn is_busy(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Run `f` while holding the slot
    ///
    /// The permit is released when this future completes or is dropped,
    /// whatever `f` returned.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::MutexTimeout`] without running `f` when the slot
    /// cannot be acquired within the acquire timeout; otherwise returns
    /// whatever `f` returns.
    pub async fn with_exclusive<F, Fut, T>(&self, f: F) -> Result<T, ToolError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ToolError>>,
    {
        let _permit = match time::timeout(self.acquire_timeout, self.slot.clone().acquire_owned())
            .await
        {
            Ok(Ok(permit)) => permit,
            // The semaphore is never closed; treat closure like an expired wait
            Ok(Err(_)) | Err(_) => {
                warn!(waited = ?self.acquire_timeout, "Timed out waiting for serialized call slot");
                return Err(ToolError::MutexTimeout {
                    waited: self.acquire_timeout,
                });
            }
        };

        debug!("Acquired serialized call slot");
        f().await
    }
}
