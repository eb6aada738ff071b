//! Reorg monitor entry point.
//!
//! Loads layered configuration, dials every configured upstream, then runs
//! the coordinator until a shutdown signal arrives, printing every emitted
//! reorganization's Mermaid rendering to standard output.

use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use reorg_monitor::config::Settings;
use reorg_monitor::error::AppError;
use reorg_monitor::Coordinator;
use upstream_client::AlloyUpstreamClient;

/// Live blockchain reorg-detection engine.
#[derive(Parser, Debug)]
#[command(name = "reorg-monitor")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration environment to layer over the defaults (looks for
    /// `config/{environment}.toml`).
    #[arg(short, long, env = "REORG_MONITOR_ENV", default_value = "default")]
    environment: String,

    /// Enable verbose (debug-level) logging, overriding `settings.debug`.
    #[arg(short, long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            init_tracing_fallback();
            error!(%error, "reorg-monitor exited with error");
            ExitCode::FAILURE
        }
    }
}

/// Initializes a minimal fallback subscriber for errors raised before
/// `init_tracing` runs (e.g. a config load failure).
fn init_tracing_fallback() {
    let _ = tracing_subscriber::fmt().with_env_filter("info").try_init();
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let settings = Settings::load(&cli.environment)?;
    init_tracing(cli.debug || settings.debug);

    info!(version = reorg_monitor::VERSION, environment = %cli.environment, "starting reorg-monitor");

    settings.validate().map_err(AppError::InvalidConfig)?;

    if settings.upstream_uris.is_empty() {
        return Err(AppError::NoUpstreams);
    }

    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel(16);
    let coordinator = Coordinator::<AlloyUpstreamClient>::new(&settings.upstream_uris, outbound_tx, settings.max_blocks);

    let connected = coordinator.connect_clients().await;
    if connected == 0 {
        return Err(AppError::AllUpstreamsUnreachable {
            attempted: settings.upstream_uris.len(),
        });
    }
    info!(connected, attempted = settings.upstream_uris.len(), "initial upstream dial complete");

    let cancel = CancellationToken::new();
    let consumer_cancel = cancel.clone();
    let consumer = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = consumer_cancel.cancelled() => break,
                record = outbound_rx.recv() => {
                    let Some(record) = record else { break };
                    info!(id = %record.id(), depth = record.depth(), blocks = record.blocks_involved().len(), "reorg");
                    println!("{}", record.to_mermaid());
                }
            }
        }
    });

    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_cancel.cancel();
        }
    });

    coordinator.subscribe_and_listen(cancel).await;
    let _ = consumer.await;

    Ok(())
}
