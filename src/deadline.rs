//! Per-call Deadline
//!
//! Cooperative cancellation for validation calls. The engine checks the
//! deadline before every I/O boundary (footer reads, catalog queries,
//! pushdown statements, materialization) and aborts with a typed
//! `Cancelled` error once it has passed.

use crate::error::{KontraError, KontraResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline controller, shareable across threads
#[derive(Clone)]
pub struct Deadline {
    cancelled: Arc<AtomicBool>,
    start: Instant,
    limit: Option<Duration>,
}

impl Deadline {
    pub fn new(limit: Option<Duration>) -> Self {
        Deadline {
            cancelled: Arc::new(AtomicBool::new(false)),
            start: Instant::now(),
            limit,
        }
    }

    /// A deadline that never fires
    pub fn unlimited() -> Self {
        Deadline::new(None)
    }

    /// Check before an I/O boundary. Returns `Cancelled` once the limit
    /// has passed or `cancel()` was called.
    pub fn check(&self) -> KontraResult<()> {
        let elapsed = self.start.elapsed();
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(KontraError::Cancelled {
                deadline_ms: self.limit.map(|d| d.as_millis() as u64).unwrap_or(0),
                elapsed_ms: elapsed.as_millis() as u64,
            });
        }
        if let Some(limit) = self.limit {
            if elapsed > limit {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(KontraError::Cancelled {
                    deadline_ms: limit.as_millis() as u64,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    /// Cancel explicitly
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
