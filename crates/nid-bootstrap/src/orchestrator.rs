//! Trigger routing.
//!
//! The orchestrator owns every component as one explicit context and maps
//! host events onto guarded install passes:
//!
//! - a new private browsing context → non-forced pass
//! - install / update / first run → forced pass
//! - permission turned on → forced pass

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, instrument, warn};

use crate::config::BootstrapConfig;
use crate::correlator::RequestCorrelator;
use crate::error::Result;
use crate::fetcher::{TokenFetcher, TokenSource};
use crate::host::{
    AccessStatus, BootstrapTransport, CookieStoreApi, HeadersReceived, PermissionProbe,
    PersistentStore, StatusIndicator,
};
use crate::installer::{InstallReport, Installer};
use crate::prefetch::PrefetchCache;
use crate::single_flight::SingleFlight;
use crate::state::SharedState;

/// External events the orchestrator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// A browsing context (window) was created.
    ContextCreated { private: bool },
    /// Installed, updated or started for the first time.
    Installed,
    /// Re-read the private-context permission.
    PermissionCheck,
}

/// Result of handling one trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(InstallReport),
    /// Another pass was already running.
    Dropped,
    /// The trigger does not call for a pass.
    NotNeeded,
    /// The pass ended early; the error has been logged.
    Failed(String),
}

/// Everything the host provides.
pub struct HostCapabilities {
    pub store: Arc<dyn PersistentStore>,
    pub transport: Arc<dyn BootstrapTransport>,
    pub header_events: broadcast::Receiver<HeadersReceived>,
    pub cookies: Arc<dyn CookieStoreApi>,
    pub permission: Arc<dyn PermissionProbe>,
    pub status: Arc<dyn StatusIndicator>,
}

pub struct Orchestrator {
    state: Arc<SharedState>,
    cache: Arc<PrefetchCache>,
    installer: Installer,
    flight: SingleFlight,
    permission: Arc<dyn PermissionProbe>,
    status: Arc<dyn StatusIndicator>,
    listener: Option<JoinHandle<()>>,
    closed: AtomicBool,
}

impl Orchestrator {
    /// Load state, attach the header listener and wire the components.
    pub async fn start(config: BootstrapConfig, host: HostCapabilities) -> Result<Self> {
        config.validate()?;

        let state = Arc::new(SharedState::load(host.store).await?);
        let correlator = RequestCorrelator::new();
        let listener = correlator.spawn_listener(host.header_events);
        let fetcher = TokenFetcher::new(&config, host.transport, correlator)?;

        let mut orchestrator = Self::from_parts(
            config,
            state,
            Arc::new(fetcher),
            host.cookies,
            host.permission,
            host.status,
        );
        orchestrator.listener = Some(listener);
        info!("Token bootstrapper started");
        Ok(orchestrator)
    }

    /// Wire the components around an arbitrary token source.
    pub fn from_parts(
        config: BootstrapConfig,
        state: Arc<SharedState>,
        source: Arc<dyn TokenSource>,
        cookies: Arc<dyn CookieStoreApi>,
        permission: Arc<dyn PermissionProbe>,
        status: Arc<dyn StatusIndicator>,
    ) -> Self {
        let cache = Arc::new(PrefetchCache::new(source, Arc::clone(&state)));
        let installer = Installer::new(config, cookies, Arc::clone(&cache));

        Self {
            state,
            cache,
            installer,
            flight: SingleFlight::new(),
            permission,
            status,
            listener: None,
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn cache(&self) -> &Arc<PrefetchCache> {
        &self.cache
    }

    pub async fn handle(&self, trigger: Trigger) -> PassOutcome {
        debug!(?trigger, "Handling trigger");
        match trigger {
            Trigger::ContextCreated { private } => self.on_context_created(private).await,
            Trigger::Installed => self.on_installed().await,
            Trigger::PermissionCheck => self.check_permission().await,
        }
    }

    pub async fn on_context_created(&self, private: bool) -> PassOutcome {
        if !private {
            return PassOutcome::NotNeeded;
        }
        self.run_pass(false).await
    }

    pub async fn on_installed(&self) -> PassOutcome {
        self.run_pass(true).await
    }

    /// Refresh the status surface and react to a permission transition.
    #[instrument(skip(self))]
    pub async fn check_permission(&self) -> PassOutcome {
        let allowed = match self.permission.is_allowed_in_private().await {
            Ok(allowed) => allowed,
            Err(e) => {
                error!(error = %e, "Permission query failed");
                return PassOutcome::Failed(e.to_string());
            }
        };

        self.status.show(&AccessStatus::from_permission(allowed));

        if allowed == self.state.permission_granted().await {
            return PassOutcome::NotNeeded;
        }

        info!(allowed, "Private-context permission changed");
        if let Err(e) = self.state.set_permission_granted(allowed).await {
            warn!(error = %e, "Failed to persist permission state (non-fatal)");
        }

        if allowed {
            // Existing private contexts get a fresh token right away.
            self.run_pass(true).await
        } else {
            PassOutcome::NotNeeded
        }
    }

    /// One guarded install pass. Errors end here; they are logged and never
    /// retried, the next trigger is the only retry.
    async fn run_pass(&self, force_override: bool) -> PassOutcome {
        if self.closed.load(Ordering::Acquire) {
            warn!("Install pass requested after shutdown");
            return PassOutcome::Failed("orchestrator is shut down".to_string());
        }

        match self
            .flight
            .try_run(self.installer.ensure_installed(force_override))
            .await
        {
            None => PassOutcome::Dropped,
            Some(Ok(report)) => PassOutcome::Completed(report),
            Some(Err(e)) => {
                error!(
                    error = %e,
                    transient = e.is_transient(),
                    force_override,
                    "Install pass failed"
                );
                PassOutcome::Failed(e.to_string())
            }
        }
    }

    /// Handle triggers until the channel closes.
    ///
    /// Each trigger runs as its own task, so triggers arriving together
    /// contend on the single-flight guard instead of queueing.
    pub async fn run(self: Arc<Self>, mut triggers: mpsc::Receiver<Trigger>) {
        let mut tasks = JoinSet::new();

        while let Some(trigger) = triggers.recv().await {
            let orchestrator = Arc::clone(&self);
            tasks.spawn(async move { orchestrator.handle(trigger).await });

            // Reap finished handlers as we go.
            while let Some(done) = tasks.try_join_next() {
                log_task_result(done);
            }
        }

        while let Some(done) = tasks.join_next().await {
            log_task_result(done);
        }
        debug!("Trigger channel closed");
    }

    /// Wait for background work and detach from the header stream.
    ///
    /// Passes requested afterwards fail right away: with the listener gone,
    /// no fetch could ever be answered.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.cache.wait_for_refills().await;
        if let Some(listener) = &self.listener {
            listener.abort();
        }
    }
}

fn log_task_result(result: std::result::Result<PassOutcome, tokio::task::JoinError>) {
    match result {
        Ok(outcome) => debug!(?outcome, "Trigger handled"),
        Err(e) => error!(error = %e, "Trigger handler panicked"),
    }
}
