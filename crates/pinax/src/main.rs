//! Entry point: loads configuration, wires every crate together, and serves
//! the dispatcher and the ambient telemetry surface until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use pinax_clients::{ModelGatewayClient, ObjectStore, ObjectStoreClient};
use pinax_context::ContextFetcher;
use pinax_extractor::Extractor;
use pinax_store::ChunkStore;
use pinax_telemetry::PrometheusSink;
use pinax_types::Config;
use pinax_worker::{Deps, HttpOrchestratorCallback, OrchestratorCallback};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// PINAX archival-metadata batch-processing engine.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Resume mid-flight chunks left by a prior process before accepting
    /// new `/process` calls. Disabling this is only useful for tests that
    /// want a clean slate against an existing store file.
    #[arg(long, default_value_t = true)]
    resume: bool,
}

fn install_metrics() {
    match PrometheusSink::new() {
        Ok(sink) => pinax_telemetry::install(Box::leak(Box::new(sink))),
        Err(e) => tracing::warn!(error = %e, "failed to register prometheus metrics, falling back to no-op sink"),
    }
}

fn build_deps(config: Config) -> Result<Deps> {
    let config = Arc::new(config);

    let store = ChunkStore::open(&PathBuf::from(&config.store_path))
        .context("failed to open chunk store")?;

    let object_store: Arc<dyn ObjectStore> =
        Arc::new(ObjectStoreClient::new(config.object_store_base_url.clone()));

    let context_fetcher = ContextFetcher::new(
        object_store.clone(),
        config.model_max_tokens,
        config.content_token_proportion,
    );

    let gateway = ModelGatewayClient::new(
        config.deepinfra_base_url.clone(),
        config.deepinfra_api_key.clone(),
        config.model_name.clone(),
    );
    let extractor = Extractor::new(Arc::new(gateway));

    let callback: Arc<dyn OrchestratorCallback> =
        Arc::new(HttpOrchestratorCallback::new(config.orchestrator_base_url.clone()));

    Ok(Deps {
        store: Arc::new(store),
        object_store,
        context_fetcher: Arc::new(context_fetcher),
        extractor: Arc::new(extractor),
        callback,
        config,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    pinax_telemetry::init_tracing();
    install_metrics();

    let cli = Cli::parse();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    let listen_addr = config.listen_addr.clone();
    let metrics_addr = config.metrics_addr.clone();

    let deps = build_deps(config)?;

    if cli.resume {
        let resumed = pinax_worker::resume_incomplete_chunks(&deps)
            .context("failed to resume incomplete chunks")?;
        if resumed > 0 {
            tracing::info!(resumed, "resumed incomplete chunk workers after restart");
        }
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics_socket = metrics_addr
        .parse()
        .context("invalid METRICS_ADDR")?;
    let telemetry_handle = tokio::spawn(pinax_telemetry::http::serve(metrics_socket, shutdown_rx));

    let app = pinax_gateway::build_router(deps);
    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .with_context(|| format!("failed to bind dispatcher listen address {listen_addr}"))?;
    tracing::info!(%listen_addr, "dispatcher listening");

    let mut shutdown_rx_for_gateway = shutdown_tx.subscribe();
    let gateway_handle = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx_for_gateway.changed().await;
            })
            .await
    });

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = gateway_handle.await;
    let _ = telemetry_handle.await;

    Ok(())
}
