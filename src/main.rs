//! svcwatch entry point.
//!
//! Watches a Kubernetes service and keeps a JSON file with its addresses
//! up to date.

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

mod config;
mod service;
mod source;
mod statefile;
mod supervisor;
mod types;
mod updater;

use config::{Args, Config};
use source::{KubeSource, ServiceSource};
use statefile::FileStore;
use supervisor::{shutdown_signal, ErrorPolicy};

const EXIT_LOGGER: u8 = 1;
const EXIT_CLUSTER: u8 = 2;
const EXIT_WATCH: u8 = 3;
const EXIT_FAULT: u8 = 4;

/// Git revision baked in at build time, if any.
const COMMIT_ID: &str = match option_env!("SVCWATCH_COMMIT_ID") {
    Some(id) => id,
    None => "(unset)",
};

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    if let Err(e) =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init()
    {
        eprintln!("failed to set up logger: {}", e);
        return ExitCode::from(EXIT_LOGGER);
    }

    info!(
        "Initializing service watcher: program={} version={} commit={}",
        std::env::args().next().unwrap_or_default(),
        env!("CARGO_PKG_VERSION"),
        COMMIT_ID
    );

    // Load configuration
    let cfg = match Config::load(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("{}", e);
            return ExitCode::from(EXIT_LOGGER);
        }
    };
    info!(
        "Starting service watcher: destination={:?} label_key={:?} label_value={:?} namespace={:?} KUBECONFIG={:?}",
        cfg.destination,
        cfg.label_key,
        cfg.label_value,
        cfg.namespace,
        std::env::var("KUBECONFIG").unwrap_or_default()
    );

    let client = match KubeSource::connect().await {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create cluster client: {:#}", e);
            return ExitCode::from(EXIT_CLUSTER);
        }
    };

    let source = KubeSource::new(client, cfg.namespace.clone(), cfg.selector());
    let events = match source.subscribe().await {
        Ok(events) => events,
        Err(e) => {
            error!("Failed to create watch: {:#}", e);
            return ExitCode::from(EXIT_WATCH);
        }
    };

    let store = FileStore::new(&cfg.destination);
    info!("Writing host state to {}", store.path().display());

    let reason = match supervisor::run(
        events,
        shutdown_signal(),
        store,
        &cfg.label_key,
        ErrorPolicy::with_limit(cfg.write_error_limit),
    )
    .await
    {
        Ok(reason) => reason,
        Err(e) => {
            error!("Service watcher failed: {:#}", e);
            return ExitCode::from(EXIT_FAULT);
        }
    };

    info!("Shutdown complete: {:?}", reason);
    if reason.is_fault() {
        ExitCode::from(EXIT_FAULT)
    } else {
        ExitCode::SUCCESS
    }
}
