//! Capabilities provided by the host environment.
//!
//! Everything the bootstrapper needs from the outside world goes through one
//! of these traits: durable key/value storage, the bootstrap transport, the
//! cookie-store API, the permission query and the status surface.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::error::Result;

/// Raw key/value items as held by the durable store.
pub type Items = Map<String, Value>;

/// Durable key/value storage, available before any trigger fires.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Load every stored item. Missing keys mean defaults.
    async fn load(&self) -> Result<Items>;

    /// Persist the given items, overwriting keys already present.
    async fn save(&self, items: &Items) -> Result<()>;
}

/// A completed response observed by the host.
///
/// `headers` holds every header entry, including repeated `set-cookie`
/// values.
#[derive(Debug, Clone)]
pub struct HeadersReceived {
    pub url: Url,
    pub headers: HeaderMap,
}

/// Issues the bootstrap request.
///
/// Implementations must omit ambient credentials and must not follow
/// redirects. The response headers are delivered through the host's
/// header-observation stream, not through the return value.
#[async_trait]
pub trait BootstrapTransport: Send + Sync {
    async fn dispatch(&self, url: Url) -> Result<()>;
}

/// One credential store (cookie jar) that should receive a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialStoreRef {
    pub id: String,
    pub is_private: bool,
}

impl CredentialStoreRef {
    pub fn new(id: impl Into<String>, is_private: bool) -> Self {
        Self {
            id: id.into(),
            is_private,
        }
    }
}

/// What the cookie-store API reports when asked for its stores.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreListing {
    /// Every store carries an explicit private flag.
    Flagged(Vec<CredentialStoreRef>),
    /// Only identifiers, in positional order: the first is the default
    /// store, every later one belongs to a private context.
    Positional(Vec<String>),
}

/// Cross-site policy of an installed cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
    #[default]
    NoRestriction,
    Lax,
    Strict,
}

/// A cookie to install into one store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CookieSpec {
    pub url: String,
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: SameSite,
    /// Unix seconds; `None` makes it a session cookie.
    pub expiration_date: Option<i64>,
}

/// Credential-store API of the host.
#[async_trait]
pub trait CookieStoreApi: Send + Sync {
    async fn list_stores(&self) -> Result<StoreListing>;

    /// Value of the named cookie visible to `url` in the given store.
    async fn get_cookie(&self, store_id: &str, url: &str, name: &str) -> Result<Option<String>>;

    async fn set_cookie(&self, store_id: &str, cookie: &CookieSpec) -> Result<()>;
}

/// Whether the host lets us operate in private contexts.
#[async_trait]
pub trait PermissionProbe: Send + Sync {
    async fn is_allowed_in_private(&self) -> Result<bool>;
}

/// User-visible state of the bootstrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessStatus {
    pub enabled: bool,
    pub badge: Option<&'static str>,
    pub message: &'static str,
}

impl AccessStatus {
    pub const ENABLED_MESSAGE: &'static str =
        "Active: new private windows receive a fresh session cookie.";
    pub const DISABLED_MESSAGE: &'static str =
        "Inactive: allow this extension to run in private windows to enable it.";

    pub fn from_permission(allowed: bool) -> Self {
        if allowed {
            Self {
                enabled: true,
                badge: None,
                message: Self::ENABLED_MESSAGE,
            }
        } else {
            Self {
                enabled: false,
                badge: Some("Off"),
                message: Self::DISABLED_MESSAGE,
            }
        }
    }
}

/// Status surface (icon, badge, popup message).
pub trait StatusIndicator: Send + Sync {
    fn show(&self, status: &AccessStatus);
}
