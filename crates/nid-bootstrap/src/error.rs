//! Token bootstrap error types.

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, NidError>;

/// Errors that can occur while minting or installing a token.
#[derive(Debug, Error)]
pub enum NidError {
    /// No correlated response arrived before the fetch deadline.
    #[error("Timed out waiting for the bootstrap response")]
    Timeout,

    /// The bootstrap request itself failed at the network level.
    #[error("Bootstrap request failed: {0}")]
    RequestFailed(String),

    /// The response arrived but carried no usable token cookie.
    #[error("Token cookie not found in response headers")]
    TokenNotFound,

    /// The credential-store API rejected a call.
    #[error("Credential store unavailable: {0}")]
    StoreUnavailable(String),

    /// Durable state could not be loaded or saved.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NidError {
    pub fn request_failed(msg: impl Into<String>) -> Self {
        Self::RequestFailed(msg.into())
    }

    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Check if this error is transient, i.e. the next trigger may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RequestFailed(_) | Self::StoreUnavailable(_)
        )
    }
}

impl From<reqwest::Error> for NidError {
    fn from(err: reqwest::Error) -> Self {
        // The client deadline equals the fetch deadline; either one firing
        // means the response never came.
        if err.is_timeout() {
            return NidError::Timeout;
        }
        NidError::RequestFailed(err.to_string())
    }
}

impl From<serde_json::Error> for NidError {
    fn from(err: serde_json::Error) -> Self {
        NidError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for NidError {
    fn from(err: std::io::Error) -> Self {
        NidError::Persistence(err.to_string())
    }
}
