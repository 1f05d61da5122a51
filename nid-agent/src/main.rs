mod cli;
mod config;
mod host;
mod jar;

use std::{process, sync::Arc};

use anyhow::{Result, bail, ensure};
use clap::Parser;
use nid_bootstrap::{
    AccessStatus, HostCapabilities, HttpTransport, JsonFileStore, Orchestrator, PassOutcome,
    RequestCorrelator, SharedState, TokenFetcher, TokenSource, Trigger, header_stream,
};
use tracing::{Level, debug, error, info};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::{
    cli::{Args, Commands},
    config::AgentConfig,
    host::{ConfigPermission, LogStatus},
    jar::JsonCookieJar,
};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("{e:#}");
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("nid_bootstrap=debug,nid_agent=debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("nid_bootstrap=info,nid_agent=info"))
            .add_directive(Level::WARN.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(verbose).with_writer(std::io::stderr))
        .init();
}

async fn run(args: Args) -> Result<()> {
    let config = AgentConfig::load(args.config.as_deref())?;
    debug!(?config, "Configuration loaded");

    match args.command {
        Commands::Fetch => fetch(&config).await,
        Commands::Install { force } => {
            let trigger = install_trigger(force, config.private_access_allowed)?;
            run_triggers(&config, &[trigger]).await
        }
        Commands::Startup => {
            let mut triggers = vec![Trigger::PermissionCheck];
            if config.private_access_allowed {
                triggers.push(Trigger::Installed);
            }
            run_triggers(&config, &triggers).await
        }
        Commands::Status => status(&config).await,
    }
}

/// Trigger for an explicit install, refused while private access is off.
fn install_trigger(force: bool, private_access_allowed: bool) -> Result<Trigger> {
    ensure!(
        private_access_allowed,
        "{}",
        AccessStatus::from_permission(false).message
    );
    Ok(if force {
        Trigger::Installed
    } else {
        Trigger::ContextCreated { private: true }
    })
}

async fn fetch(config: &AgentConfig) -> Result<()> {
    let (events, observed) = header_stream();
    let transport = Arc::new(HttpTransport::new(&config.bootstrap, events)?);
    let correlator = RequestCorrelator::new();
    let listener = correlator.spawn_listener(observed);

    let fetcher = TokenFetcher::new(&config.bootstrap, transport, correlator)?;
    let result = fetcher.fetch().await;
    listener.abort();

    println!("{}", result?);
    Ok(())
}

/// Handle `triggers` in order, stopping after the first one that ran a pass.
async fn run_triggers(config: &AgentConfig, triggers: &[Trigger]) -> Result<()> {
    let jar = Arc::new(JsonCookieJar::new(&config.cookie_jar));
    jar.ensure_exists().await?;

    let (events, observed) = header_stream();
    let host = HostCapabilities {
        store: Arc::new(JsonFileStore::new(&config.state_file)),
        transport: Arc::new(HttpTransport::new(&config.bootstrap, events)?),
        header_events: observed,
        cookies: jar,
        permission: Arc::new(ConfigPermission::new(config.private_access_allowed)),
        status: Arc::new(LogStatus),
    };

    let orchestrator = Orchestrator::start(config.bootstrap.clone(), host).await?;
    let mut outcome = PassOutcome::NotNeeded;
    for &trigger in triggers {
        outcome = orchestrator.handle(trigger).await;
        if outcome != PassOutcome::NotNeeded {
            break;
        }
    }
    // The background refill must land in the state file before we exit.
    orchestrator.shutdown().await;

    match outcome {
        PassOutcome::Completed(report) => {
            for (store, result) in &report.stores {
                info!(store = %store, ?result, "Store processed");
            }
            println!(
                "installed={} skipped={} failed={}",
                report.installed(),
                report.skipped(),
                report.failed()
            );
        }
        PassOutcome::NotNeeded => println!("nothing to do"),
        PassOutcome::Dropped => println!("another pass is running"),
        PassOutcome::Failed(reason) => bail!("install pass failed: {reason}"),
    }
    Ok(())
}

async fn status(config: &AgentConfig) -> Result<()> {
    let state = SharedState::load(Arc::new(JsonFileStore::new(&config.state_file)))
        .await?
        .snapshot()
        .await;
    let access = AccessStatus::from_permission(config.private_access_allowed);

    println!("state file:        {}", config.state_file.display());
    println!("cookie jar:        {}", config.cookie_jar.display());
    println!(
        "prefetched token:  {}",
        if state.next_token.is_some() { "ready" } else { "none" }
    );
    println!("permission (last): {}", state.permission_granted);
    println!("status:            {}", access.message);
    Ok(())
}
