use chain_ingest::app::Ingest;
use chain_ingest::blockchain::hub::Hub;
use chain_ingest::config::Config;
use chain_ingest::db::connection::establish_connection;
use chain_ingest::messaging::LocalBlobStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting chain-ingest");

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return Err(e.into());
        }
    };
    info!(
        "Configuration loaded: {} RPC endpoints, {} workers",
        config.rpc_endpoints.len(),
        config.num_workers
    );

    let db_pool = establish_connection(&config.database_url).await.map_err(|e| {
        error!("Database connection failed: {}", e);
        e
    })?;

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let blobs = Arc::new(LocalBlobStore::new(config.blob_root.clone()));
    let hub = Arc::new(Hub::from_endpoints(
        &config.rpc_endpoints,
        config.rpc_timeout,
        config.rpc_rate_limit,
    )?);

    let ingest = Ingest::start(&config, hub, db_pool.clone(), blobs, shutdown)
        .await
        .map_err(|e| {
            error!("{}", e);
            e
        })?;
    ingest.run().await;

    db_pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = terminate.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl-C");
    }

    shutdown.cancel();
}
