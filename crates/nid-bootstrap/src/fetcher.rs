//! Token minting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, SET_COOKIE};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::config::BootstrapConfig;
use crate::correlator::{Marker, RequestCorrelator};
use crate::error::{NidError, Result};
use crate::host::BootstrapTransport;
use crate::token::Token;

/// Anything able to produce a fresh token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch(&self) -> Result<Token>;
}

/// Mints tokens by calling the bootstrap endpoint anonymously.
pub struct TokenFetcher {
    transport: Arc<dyn BootstrapTransport>,
    correlator: Arc<RequestCorrelator>,
    bootstrap_url: Url,
    instance_id: String,
    cookie_pattern: Regex,
    timeout: Duration,
}

impl TokenFetcher {
    pub fn new(
        config: &BootstrapConfig,
        transport: Arc<dyn BootstrapTransport>,
        correlator: Arc<RequestCorrelator>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            transport,
            correlator,
            bootstrap_url: config.bootstrap_url()?,
            instance_id: config.instance_id.clone(),
            cookie_pattern: cookie_pattern(&config.cookie_name)?,
            timeout: config.fetch_timeout(),
        })
    }

    /// Bootstrap URL tagged with a fresh marker, keyed the way observed
    /// responses will report it.
    fn marked_url(&self) -> (Url, Marker) {
        let mut url = self.bootstrap_url.clone();
        let marker = Marker::generate(&self.instance_id).attach_to(&mut url);
        (url, marker)
    }

    async fn request_headers(&self, url: Url, marker: Marker) -> Result<HeaderMap> {
        let pending = self.correlator.register(marker)?;

        self.transport.dispatch(url).await?;
        pending.wait().await
    }
}

#[async_trait]
impl TokenSource for TokenFetcher {
    #[instrument(skip(self))]
    async fn fetch(&self) -> Result<Token> {
        let (url, marker) = self.marked_url();
        debug!(%marker, "Requesting bootstrap token");

        // Dropping the request future on timeout also drops the pending
        // entry, so a late response is ignored.
        let request = self.request_headers(url, marker);
        let headers = match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(timeout = ?self.timeout, "Bootstrap request timed out");
                return Err(NidError::Timeout);
            }
        };

        extract_token(&headers, &self.cookie_pattern).ok_or(NidError::TokenNotFound)
    }
}

/// Pattern capturing the value of `name=` up to the first `;` or space.
pub fn cookie_pattern(name: &str) -> Result<Regex> {
    Regex::new(&format!(r"(?:^|[;\s]){}=([^; ]*)", regex::escape(name)))
        .map_err(|e| NidError::config(format!("invalid cookie name: {e}")))
}

/// Scan every `set-cookie` entry in order and return the first match.
pub fn extract_token(headers: &HeaderMap, pattern: &Regex) -> Option<Token> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|value| {
            pattern
                .captures(value)
                .and_then(|caps| caps.get(1))
                .map(|m| Token::new(m.as_str()))
        })
}
