//! Bootstrap configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{NidError, Result};

pub const DEFAULT_BOOTSTRAP_URL: &str = "https://www.google.com/ncr";
pub const DEFAULT_COOKIE_NAME: &str = "NID";
pub const DEFAULT_COOKIE_URL: &str = "https://www.google.com";
pub const DEFAULT_COOKIE_DOMAIN: &str = ".google.com";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Where the token comes from and where it is installed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Endpoint whose redirect response sets the token cookie.
    pub bootstrap_url: String,
    /// Name of the cookie carrying the token.
    pub cookie_name: String,
    /// URL the cookie is installed for.
    pub cookie_url: String,
    /// Domain attribute of the installed cookie (leading dot = domain-scoped).
    pub cookie_domain: String,
    /// Prefix of every request marker; identifies this instance's traffic.
    pub instance_id: String,
    /// Seconds to wait for a correlated response.
    pub fetch_timeout_secs: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            bootstrap_url: DEFAULT_BOOTSTRAP_URL.to_string(),
            cookie_name: DEFAULT_COOKIE_NAME.to_string(),
            cookie_url: DEFAULT_COOKIE_URL.to_string(),
            cookie_domain: DEFAULT_COOKIE_DOMAIN.to_string(),
            instance_id: "nid-bootstrap".to_string(),
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
        }
    }
}

impl BootstrapConfig {
    /// Check that URLs parse and names are usable.
    pub fn validate(&self) -> Result<()> {
        self.bootstrap_url()?;
        self.cookie_url()?;
        if self.cookie_name.is_empty() {
            return Err(NidError::config("cookie_name must not be empty"));
        }
        if self.instance_id.is_empty() || self.instance_id.contains('#') {
            return Err(NidError::config(
                "instance_id must be non-empty and must not contain '#'",
            ));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(NidError::config("fetch_timeout_secs must be positive"));
        }
        Ok(())
    }

    pub fn bootstrap_url(&self) -> Result<Url> {
        let url = Url::parse(&self.bootstrap_url)
            .map_err(|e| NidError::config(format!("invalid bootstrap_url: {e}")))?;
        if url.fragment().is_some() {
            return Err(NidError::config("bootstrap_url must not carry a fragment"));
        }
        Ok(url)
    }

    pub fn cookie_url(&self) -> Result<Url> {
        Url::parse(&self.cookie_url)
            .map_err(|e| NidError::config(format!("invalid cookie_url: {e}")))
    }

    #[inline]
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
