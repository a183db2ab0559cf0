//! shipd - Chunked artifact delivery over WebSocket
//!
//! The daemon wires configuration, storage, the delivery service, and the
//! WebSocket gateway together, then drains the event channel into tracing
//! until interrupted.

mod cli;
mod error;
mod logging;

use crate::cli::{Cli, Commands, ServeArgs};
use crate::error::CliError;
use clap::Parser;
use shipd_config::Config;
use shipd_delivery::DeliveryService;
use shipd_events::EventReceiver;
use shipd_gateway::DeliveryServer;
use shipd_store::ArtifactStore;
use shipd_types::SourceMode;
use std::process;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long to wait for queued accounting records after the gateway stops
const ACCOUNTING_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init_tracing(
        cli.global.log_format.unwrap_or_default(),
        cli.global.debug,
    );

    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<(), CliError> {
    // Precedence: file (or defaults), then environment, then flags
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;
    apply_cli_config(&mut config, cli.command.overrides());
    config.validate()?;

    match cli.command {
        Commands::ShowConfig(_) => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Serve(_) => serve(config).await,
    }
}

async fn serve(config: Config) -> Result<(), CliError> {
    info!("Starting shipd v{}", env!("CARGO_PKG_VERSION"));

    let (event_sender, event_receiver) = shipd_events::channel();
    let event_drain = tokio::spawn(drain_events(event_receiver));

    if matches!(config.source.mode, SourceMode::Local | SourceMode::Cached) {
        ArtifactStore::new(config.storage.root.clone())
            .initialize()
            .await?;
    }

    let (service, accounting_worker) =
        DeliveryService::from_config(&config, event_sender.clone()).await?;
    let server = DeliveryServer::bind(&config.server, service, event_sender.clone()).await?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let result = server.run(shutdown).await;

    // The server owned the last service handle; once its sessions are gone
    // the accounting queue closes and the worker finishes.
    if tokio::time::timeout(ACCOUNTING_DRAIN_TIMEOUT, accounting_worker)
        .await
        .is_err()
    {
        warn!("accounting worker did not finish in time");
    }

    drop(event_sender);
    let _ = tokio::time::timeout(ACCOUNTING_DRAIN_TIMEOUT, event_drain).await;

    result?;
    info!("shipd stopped");
    Ok(())
}

async fn drain_events(mut events: EventReceiver) {
    while let Some(event) = events.recv().await {
        logging::log_event_with_tracing(&event);
    }
}

async fn watch_signals(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("interrupt received, shutting down"),
        Err(e) => error!("failed to listen for interrupt: {e}"),
    }
    shutdown.cancel();
}

/// Apply CLI configuration overrides (highest precedence)
fn apply_cli_config(config: &mut Config, args: &ServeArgs) {
    if let Some(listen) = args.listen {
        config.server.listen = listen;
    }
    if let Some(root) = &args.storage_root {
        config.storage.root.clone_from(root);
    }
    if let Some(mode) = args.source_mode {
        config.source.mode = mode;
    }
    if let Some(url) = &args.upstream_url {
        config.upstream.base_url = Some(url.clone());
    }
    if let Some(catalog) = &args.catalog {
        config.catalog.path = Some(catalog.clone());
    }
}
