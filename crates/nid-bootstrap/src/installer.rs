//! Install cycle: put a token into every private credential store.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::BootstrapConfig;
use crate::error::{NidError, Result};
use crate::host::{CookieStoreApi, CredentialStoreRef};
use crate::prefetch::PrefetchCache;
use crate::stores::{enumerate_private_stores, token_cookie};

/// What happened to one store during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// A token cookie was already present and the pass was not forced.
    Skipped,
    Installed,
    Failed(String),
}

/// Summary of one install pass, in enumeration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    pub stores: Vec<(String, StoreOutcome)>,
}

impl InstallReport {
    pub fn installed(&self) -> usize {
        self.count(|o| matches!(o, StoreOutcome::Installed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, StoreOutcome::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, StoreOutcome::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&StoreOutcome) -> bool) -> usize {
        self.stores.iter().filter(|(_, o)| pred(o)).count()
    }
}

pub struct Installer {
    config: BootstrapConfig,
    cookies: Arc<dyn CookieStoreApi>,
    cache: Arc<PrefetchCache>,
}

impl Installer {
    pub fn new(
        config: BootstrapConfig,
        cookies: Arc<dyn CookieStoreApi>,
        cache: Arc<PrefetchCache>,
    ) -> Self {
        Self {
            config,
            cookies,
            cache,
        }
    }

    /// Make sure every private store holds a token cookie.
    ///
    /// Stores are handled one after another in enumeration order. A failure
    /// on one store is recorded and the pass moves on to the next store; only
    /// a failed enumeration ends the pass early.
    #[instrument(skip(self))]
    pub async fn ensure_installed(&self, force_override: bool) -> Result<InstallReport> {
        let stores = enumerate_private_stores(self.cookies.as_ref())
            .await
            .map_err(|e| match e {
                NidError::StoreUnavailable(_) => e,
                other => NidError::store_unavailable(other.to_string()),
            })?;

        let mut report = InstallReport::default();
        for store in stores {
            let outcome = match self.install_into(&store, force_override).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(store_id = %store.id, error = %e, "Failed to install token");
                    StoreOutcome::Failed(e.to_string())
                }
            };
            report.stores.push((store.id, outcome));
        }

        info!(
            installed = report.installed(),
            skipped = report.skipped(),
            failed = report.failed(),
            "Install pass finished"
        );
        Ok(report)
    }

    async fn install_into(
        &self,
        store: &CredentialStoreRef,
        force_override: bool,
    ) -> Result<StoreOutcome> {
        if !force_override {
            let existing = self
                .cookies
                .get_cookie(&store.id, &self.config.cookie_url, &self.config.cookie_name)
                .await?;
            if existing.is_some() {
                debug!(store_id = %store.id, "Token cookie already set");
                return Ok(StoreOutcome::Skipped);
            }
        }

        let token = self.cache.take().await?;
        self.cookies
            .set_cookie(&store.id, &token_cookie(&self.config, &token))
            .await?;
        info!(store_id = %store.id, "Installed token cookie");
        Ok(StoreOutcome::Installed)
    }
}
