mod config;
mod telemetry;

use clap::Parser;
use config::{CliArgs, ClientConfig};
use hello_stream_client::{Session, trigger};
use std::sync::Arc;
use telemetry::init_telemetry;
use tokio::{net::TcpListener, signal, sync::Mutex};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ClientConfig::try_from(args)?;

    init_telemetry();

    let session = Session::open(config.session.clone()).await?;
    let session = Arc::new(Mutex::new(session));

    let listener = TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(
        "Trigger listening on {} (streaming to {})",
        config.listen_addr,
        config.session.server_addr
    );

    axum::serve(listener, trigger::router(Arc::clone(&session)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.lock().await.shutdown().await;
    tracing::info!("Client shut down successfully");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        () = terminate => tracing::info!("Received SIGTERM signal"),
    }
}
