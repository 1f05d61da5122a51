//! Request/response correlation.
//!
//! The host reports response headers through a single event stream that also
//! carries unrelated traffic. Each bootstrap request carries a unique marker
//! in its URL fragment; the correlator keeps a table of markers awaiting a
//! response and routes each observed response to the matching waiter.
//!
//! The listener is attached once, for the lifetime of the correlator. Waiters
//! only add a table entry before their request is dispatched, so a response
//! can never arrive before something is listening for it.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use reqwest::header::HeaderMap;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};
use url::Url;
use uuid::Uuid;

use crate::error::{NidError, Result};
use crate::host::HeadersReceived;

/// Unique per-request correlation key, carried as the URL fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Marker(String);

impl Marker {
    /// Generate a fresh marker of the form `<instance_id>-<random>`.
    pub fn generate(instance_id: &str) -> Self {
        Self(format!("{}-{}", instance_id, Uuid::new_v4().simple()))
    }

    /// Attach the marker to `url` as its fragment.
    ///
    /// Returns the marker as the URL serialized it. Characters outside the
    /// fragment set are percent-encoded, and observed URLs carry that form.
    pub fn attach_to(&self, url: &mut Url) -> Marker {
        url.set_fragment(Some(&self.0));
        match url.fragment() {
            Some(fragment) => Self(fragment.to_string()),
            None => self.clone(),
        }
    }

    /// Fragment text, without the leading `#`.
    #[inline]
    pub fn as_fragment(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Table of requests awaiting their response headers.
#[derive(Default)]
pub struct RequestCorrelator {
    pending: Mutex<HashMap<String, oneshot::Sender<HeaderMap>>>,
}

impl RequestCorrelator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a pending entry for `marker`.
    ///
    /// The entry lives until headers arrive or the returned handle is
    /// dropped, whichever happens first.
    pub fn register(self: &Arc<Self>, marker: Marker) -> Result<PendingResponse> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock();
            if pending.contains_key(marker.as_fragment()) {
                return Err(NidError::request_failed(format!(
                    "marker {marker} is already pending"
                )));
            }
            pending.insert(marker.as_fragment().to_string(), tx);
        }
        trace!(%marker, "Registered pending request");

        Ok(PendingResponse {
            marker,
            rx,
            correlator: Arc::downgrade(self),
        })
    }

    /// Route one observed response. Returns `true` if it resolved a waiter.
    pub fn on_headers_received(&self, event: HeadersReceived) -> bool {
        let Some(fragment) = event.url.fragment() else {
            return false;
        };

        let Some(tx) = self.pending.lock().remove(fragment) else {
            return false;
        };

        if tx.send(event.headers).is_err() {
            // Waiter was dropped between the lookup and the send.
            debug!(marker = fragment, "Response arrived for an abandoned request");
        }
        true
    }

    /// Number of requests still awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn forget(&self, marker: &Marker) {
        if self.pending.lock().remove(marker.as_fragment()).is_some() {
            debug!(%marker, "Dropped pending request before a response arrived");
        }
    }

    /// Attach the long-lived listener to the host's header-observation stream.
    pub fn spawn_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<HeadersReceived>,
    ) -> JoinHandle<()> {
        let correlator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        correlator.on_headers_received(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Header listener lagged; some responses were missed");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Header observation stream closed");
                        break;
                    }
                }
            }
        })
    }
}

/// Handle to one pending correlation.
///
/// Dropping it removes the table entry, so a late response is ignored.
pub struct PendingResponse {
    marker: Marker,
    rx: oneshot::Receiver<HeaderMap>,
    correlator: Weak<RequestCorrelator>,
}

impl PendingResponse {
    /// Wait for the correlated response headers. Never times out by itself.
    pub async fn wait(mut self) -> Result<HeaderMap> {
        (&mut self.rx)
            .await
            .map_err(|_| NidError::request_failed("correlator shut down"))
    }
}

impl Drop for PendingResponse {
    fn drop(&mut self) {
        if let Some(correlator) = self.correlator.upgrade() {
            correlator.forget(&self.marker);
        }
    }
}
