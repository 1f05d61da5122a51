//! Session token bootstrapper for private browsing contexts.
//!
//! Mints a session cookie with one anonymous request to the issuing service
//! and installs it into every private credential store, so a fresh private
//! context looks like it has visited the service once.
//!
//! # Architecture
//!
//! - [`RequestCorrelator`]: routes observed response headers to the request
//!   that caused them, keyed by a marker in the URL fragment
//! - [`TokenFetcher`]: issues the credential-less, non-redirecting request
//!   and extracts the token, with a timeout
//! - [`PrefetchCache`]: single-slot cache refilled in the background
//! - [`SingleFlight`]: drops passes requested while one is running
//! - [`Installer`]: applies tokens to every private store
//! - [`Orchestrator`]: maps host triggers onto guarded passes

pub mod config;
pub mod correlator;
pub mod error;
pub mod fetcher;
pub mod host;
pub mod installer;
pub mod orchestrator;
pub mod prefetch;
pub mod single_flight;
pub mod state;
pub mod stores;
pub mod transport;

mod token;

pub use config::BootstrapConfig;
pub use correlator::{Marker, PendingResponse, RequestCorrelator};
pub use error::{NidError, Result};
pub use fetcher::{TokenFetcher, TokenSource, extract_token};
pub use host::{
    AccessStatus, BootstrapTransport, CookieSpec, CookieStoreApi, CredentialStoreRef,
    HeadersReceived, Items, PermissionProbe, PersistentStore, SameSite, StatusIndicator,
    StoreListing,
};
pub use installer::{InstallReport, Installer, StoreOutcome};
pub use orchestrator::{HostCapabilities, Orchestrator, PassOutcome, Trigger};
pub use prefetch::PrefetchCache;
pub use single_flight::SingleFlight;
pub use state::{JsonFileStore, MemoryStore, SharedState, State};
pub use token::Token;
pub use transport::{HttpTransport, header_stream};
