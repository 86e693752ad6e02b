//! Per-request deadline and cancellation context.
//!
//! Every fact-source call and every wait on an in-flight compute is bounded by
//! the context's deadline. The cancel flag is shared with a [`CancelHandle`]
//! held by the host, so a torn-down session can abandon work it started.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::core::errors::{LtcError, Result};

/// Deadline plus cancellation flag carried through one engine request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

/// Host-side handle that cancels the request it was taken from.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether `cancel` has been called on this handle or a clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl RequestContext {
    /// Context with no deadline. Only cancellation can stop it.
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Context that expires `timeout` from now.
    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// Context that expires at `deadline`.
    #[must_use]
    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle that cancels this context and every clone of it.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    /// Absolute deadline, if any.
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the host cancelled this request.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail fast if the request was cancelled or ran past its deadline.
    ///
    /// Cancellation wins over expiry so a torn-down session always sees
    /// `ComputeCancelled`.
    pub fn check(&self, stage: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(LtcError::ComputeCancelled { stage });
        }
        if self.is_expired() {
            return Err(LtcError::SourceUnavailable {
                details: format!("deadline exceeded during {stage}"),
            });
        }
        Ok(())
    }
}
