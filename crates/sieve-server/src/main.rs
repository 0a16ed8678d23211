//! Sieve server - privacy-enforcing data connector.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sieve_server::{Args, RequestHandler, Transport};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sieve_server=info,sieve_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting sieve server");

    let args = Args::parse();
    let config = args.into_config();
    config.validate()?;

    tracing::info!(
        directory = %config.directory_path.display(),
        tcp_address = ?config.tcp_address,
        ipc_address = ?config.ipc_address,
        workers = config.transport_workers,
        jwt = config.jwt_secret.is_some(),
        "configuration loaded"
    );

    let handler = Arc::new(RequestHandler::from_config(&config)?);
    let transport = Transport::new(&config, handler)?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl+c");
            return;
        }
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    match transport.run_until_shutdown(shutdown_rx).await {
        Ok(()) => tracing::info!("server shutdown complete"),
        Err(e) => {
            tracing::error!(error = %e, "server error");
            return Err(e.into());
        }
    }

    Ok(())
}
