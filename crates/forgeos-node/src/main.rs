mod api;
mod config;

use std::sync::Arc;

use clap::Parser;
use forgeos_rpc::{GrpcPool, KaspaRpc};
use forgeos_runtime::{build_runtime, RuntimeMetrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(
                    "forgeos_node=info,forgeos_rpc=info,forgeos_runtime=info",
                )
            }),
        )
        .init();

    let config = config::Config::parse();
    config.validate()?;

    let pool = Arc::new(GrpcPool::connect(&config.pool_config()?)?);
    let metrics = Arc::new(RuntimeMetrics::new()?);
    let runtime = build_runtime(
        Arc::clone(&pool) as Arc<dyn KaspaRpc>,
        config.runtime_options(),
        Arc::clone(&metrics),
    )
    .await?;

    tracing::info!(
        network     = %config.network,
        endpoints   = pool.len(),
        distributed = runtime.is_distributed(),
        "forgeos node starting",
    );

    let state = api::ApiState::new(
        Arc::clone(&pool) as Arc<dyn api::NodeBackend>,
        Arc::clone(&runtime),
        metrics,
        config.network.trim().to_owned(),
    );
    let served = api::serve(state, config.listen_addr(), shutdown_signal()).await;

    tracing::info!("Shutting down agent runtime");
    runtime.shutdown().await;
    pool.shutdown();

    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
