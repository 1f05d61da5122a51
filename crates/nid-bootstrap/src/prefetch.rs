//! Single-slot token prefetch.
//!
//! Every successful [`PrefetchCache::take`] starts one background fetch whose
//! result lands in the slot for the next caller, so the common path never
//! waits on the network.
//!
//! The slot is eventually consistent: a refill that lands after a concurrent
//! `take` already emptied the slot simply becomes the next value, and two
//! refills racing each other leave whichever finished last.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::fetcher::TokenSource;
use crate::state::SharedState;
use crate::token::Token;

pub struct PrefetchCache {
    source: Arc<dyn TokenSource>,
    state: Arc<SharedState>,
    refills: Mutex<Vec<JoinHandle<()>>>,
    refills_started: AtomicU64,
}

impl PrefetchCache {
    pub fn new(source: Arc<dyn TokenSource>, state: Arc<SharedState>) -> Self {
        Self {
            source,
            state,
            refills: Mutex::new(Vec::new()),
            refills_started: AtomicU64::new(0),
        }
    }

    /// Hand out a token: the prefetched one if present, otherwise one
    /// fetched right now. Errors of that synchronous fetch propagate.
    #[instrument(skip(self))]
    pub async fn take(&self) -> Result<Token> {
        let token = match self.state.take_next_token().await {
            Some(token) => {
                info!("Using prefetched token");
                token
            }
            None => {
                info!("No prefetched token, fetching one now");
                self.source.fetch().await?
            }
        };

        self.spawn_refill();
        Ok(token)
    }

    /// Start a detached background fetch into the slot.
    ///
    /// Failures are logged and discarded; an empty slot only means the next
    /// `take` fetches synchronously.
    fn spawn_refill(&self) {
        let source = Arc::clone(&self.source);
        let state = Arc::clone(&self.state);

        let handle = tokio::spawn(async move {
            match source.fetch().await {
                Ok(token) => match state.store_next_token(token).await {
                    Ok(()) => debug!("Prefetched token stored for later"),
                    Err(e) => warn!(error = %e, "Failed to persist prefetched token"),
                },
                Err(e) => debug!(error = %e, "Background prefetch failed; slot stays empty"),
            }
        });

        self.refills_started.fetch_add(1, Ordering::Relaxed);
        let mut refills = self.refills.lock();
        refills.retain(|h| !h.is_finished());
        refills.push(handle);
    }

    /// Wait for every background refill started so far.
    ///
    /// Short-lived hosts call this before exiting so the prefetched token is
    /// persisted.
    pub async fn wait_for_refills(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.refills.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background prefetch task aborted");
            }
        }
    }

    /// Number of background refills started since creation.
    pub fn refills_started(&self) -> u64 {
        self.refills_started.load(Ordering::Relaxed)
    }
}
