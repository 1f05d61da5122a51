//! HTTP implementation of the bootstrap transport.
//!
//! Stands in for the browser's network stack: requests are sent without a
//! cookie store and with redirects disabled, and every response whose URL
//! matches the bootstrap endpoint is published on a header-observation
//! stream, exactly like a `webRequest`-style observer would see it.

use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::redirect::Policy;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use url::Url;

use crate::config::BootstrapConfig;
use crate::error::Result;
use crate::host::{BootstrapTransport, HeadersReceived};

pub(crate) const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Default capacity of the header-observation stream.
pub const HEADER_STREAM_CAPACITY: usize = 64;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Can happen if another crate installed it first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Client that never sends stored cookies and never follows redirects.
pub fn build_anonymous_client(request_timeout: Duration) -> Result<Client> {
    install_rustls_provider();

    let client = Client::builder()
        .user_agent(DEFAULT_UA)
        .redirect(Policy::none())
        .timeout(request_timeout)
        .build()?;
    Ok(client)
}

/// Create the header-observation stream shared by transport and correlator.
pub fn header_stream() -> (
    broadcast::Sender<HeadersReceived>,
    broadcast::Receiver<HeadersReceived>,
) {
    broadcast::channel(HEADER_STREAM_CAPACITY)
}

pub struct HttpTransport {
    client: Client,
    url_filter: Url,
    events: broadcast::Sender<HeadersReceived>,
}

impl HttpTransport {
    pub fn new(config: &BootstrapConfig, events: broadcast::Sender<HeadersReceived>) -> Result<Self> {
        let client = build_anonymous_client(config.fetch_timeout())?;
        Self::with_client(client, config, events)
    }

    pub fn with_client(
        client: Client,
        config: &BootstrapConfig,
        events: broadcast::Sender<HeadersReceived>,
    ) -> Result<Self> {
        Ok(Self {
            client,
            url_filter: config.bootstrap_url()?,
            events,
        })
    }

    /// Same scheme, host, port and path as the bootstrap endpoint.
    fn matches_filter(&self, url: &Url) -> bool {
        url.scheme() == self.url_filter.scheme()
            && url.host_str() == self.url_filter.host_str()
            && url.port_or_known_default() == self.url_filter.port_or_known_default()
            && url.path() == self.url_filter.path()
    }
}

#[async_trait]
impl BootstrapTransport for HttpTransport {
    async fn dispatch(&self, url: Url) -> Result<()> {
        // The fragment never goes on the wire; it only tags the observed event.
        let response = self.client.get(url.clone()).send().await?;
        debug!(
            status = %response.status(),
            set_cookie_count = response.headers().get_all(reqwest::header::SET_COOKIE).iter().count(),
            "Bootstrap response received"
        );

        if self.matches_filter(&url) {
            let event = HeadersReceived {
                url,
                headers: response.headers().clone(),
            };
            if self.events.send(event).is_err() {
                warn!("No header listener attached; response dropped");
            }
        }
        Ok(())
    }
}
