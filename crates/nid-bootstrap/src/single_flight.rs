//! Drop-if-busy guard for top-level passes.
//!
//! This is a debounce, not a mutex: a caller arriving while a pass is running
//! is turned away immediately instead of waiting for its turn.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

#[derive(Debug, Default)]
pub struct SingleFlight {
    busy: AtomicBool,
}

/// Clears the busy flag however the guarded future ends, including when it
/// is cancelled.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Run `operation` unless another one is in progress.
    ///
    /// Returns `None` when the call was dropped. Dropped calls are never
    /// queued or retried.
    pub async fn try_run<F>(&self, operation: F) -> Option<F::Output>
    where
        F: Future,
    {
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Pass already in progress; dropping request");
            return None;
        }

        let _guard = BusyGuard(&self.busy);
        Some(operation.await)
    }
}
