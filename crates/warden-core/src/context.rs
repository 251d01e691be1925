//! Ambient cancellation and deadline handle.
//!
//! Every tree operation receives an [`OpContext`] propagated from the
//! protocol boundary. Suspension points (KV I/O, crypto hashing, key
//! provider reads, hook execution) call [`OpContext::check`] before doing
//! work. Cancellation observed after the persistence hook does not roll
//! anything back; the persisted state is authoritative.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::errors::{Error, Result};

/// Cancellation/timeout handle carried through every operation.
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl OpContext {
    /// A context that never expires and is never cancelled.
    #[must_use]
    pub fn background() -> Self {
        Self::default()
    }

    /// A context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Marks the context cancelled. All clones observe the flag.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once the context is cancelled or past its deadline.
    #[must_use]
    pub fn is_done(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Errors with [`Error::Internal`] when the context is done.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation was cancelled or timed out.
    pub fn check(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(Error::internal("operation cancelled"));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(Error::internal("operation deadline exceeded"));
        }
        Ok(())
    }
}
