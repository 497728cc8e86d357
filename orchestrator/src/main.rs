//! Flotilla Orchestrator - Entry Point
//!
//! Control plane for fleet deployments. Holds the persistent agent
//! channels, drives deploy tasks against agent, control-API and shell
//! hosts, and serves the task submission API.

use std::collections::HashMap;
use std::env;
use std::sync::Arc;

use flotilla::config::Settings;
use flotilla::coordinator::DeployCoordinator;
use flotilla::hosts::MemoryHostStore;
use flotilla::logs::{init_logging, LogOptions};
use flotilla::models::host::Host;
use flotilla::registry::pending::PendingDeploys;
use flotilla::registry::ConnectionRegistry;
use flotilla::server::serve::serve;
use flotilla::server::state::ServerState;
use flotilla::shell::SshConnector;

use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        println!("flotilla {}", env!("CARGO_PKG_VERSION"));
        return;
    }

    // Retrieve the settings file
    let settings = match cli_args.get("config") {
        Some(path) => match read_settings(path).await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file {}: {}", path, e);
                return;
            }
        },
        None => Settings::default(),
    };

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        ..Default::default()
    };
    if let Err(e) = init_logging(log_options) {
        println!("Failed to initialize logging: {e}");
    }

    // Load the host records
    let hosts = Arc::new(MemoryHostStore::new());
    if let Some(path) = cli_args.get("hosts") {
        match read_hosts(path).await {
            Ok(records) => {
                info!("Loaded {} host record(s) from {}", records.len(), path);
                for host in records {
                    hosts.insert(host).await;
                }
            }
            Err(e) => {
                error!("Unable to read hosts file {}: {}", path, e);
                return;
            }
        }
    }

    // Wire the control plane
    let pending = Arc::new(PendingDeploys::new());
    let registry = Arc::new(ConnectionRegistry::new(
        hosts.clone(),
        settings.agent.send_retries,
        settings.agent.send_retry_delay(),
    ));
    let connector = Arc::new(SshConnector::new(settings.shell.connect_timeout()));
    let coordinator = Arc::new(DeployCoordinator::new(
        hosts.clone(),
        registry.clone(),
        pending.clone(),
        connector,
        settings.clone(),
    ));
    let state = Arc::new(ServerState::new(
        hosts,
        registry,
        pending,
        coordinator,
        settings.clone(),
    ));

    info!("Running Flotilla orchestrator on {}:{}", settings.server.host, settings.server.port);
    let handle = match serve(&settings.server, state, await_shutdown_signal()).await {
        Ok(handle) => handle,
        Err(e) => {
            error!("Failed to start the control server: {e}");
            return;
        }
    };

    match handle.await {
        Ok(Ok(())) => info!("Control server stopped"),
        Ok(Err(e)) => error!("Control server failed: {e}"),
        Err(e) => error!("Control server task panicked: {e}"),
    }
}

async fn read_settings(path: &str) -> Result<Settings, flotilla::errors::OrchestratorError> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

async fn read_hosts(path: &str) -> Result<Vec<Host>, flotilla::errors::OrchestratorError> {
    let raw = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&raw)?)
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).unwrap();
        let mut sigint = signal(SignalKind::interrupt()).unwrap();

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, shutting down...");
    }
}
