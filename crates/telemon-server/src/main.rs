use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use telemon_server::config::{Cli, ServerConfig};
use telemon_server::{app, bootstrap, grpc, report_exit, wait_for_exit, ServerHandle};
use tokio_util::sync::CancellationToken;
use tonic::transport::Server as TonicServer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli)?;
    tracing::info!(
        address = %config.address,
        grpc_address = config.grpc_address.as_deref().unwrap_or("-"),
        store_interval_secs = config.store_interval_secs,
        file_storage_path = %config.file_storage_path,
        restore = config.restore,
        database = config.database_dsn.is_some(),
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        trusted_subnet = config.trusted_subnet.as_deref().unwrap_or("-"),
        "telemon-server starting"
    );

    let components = bootstrap(&config).await?;
    let state = components.state;
    let durability = components.durability;

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    let snapshot_handle = durability
        .clone()
        .map(|d| tokio::spawn(d.run_periodic(token.clone())));

    // HTTP
    let listener = tokio::net::TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("binding {}", config.address))?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP listening");
    let http_app = app::build_http_app(state.clone(), config.request_timeout());
    let http_token = token.clone();
    let mut http_handle: Option<ServerHandle> = Some(tokio::spawn(async move {
        axum::serve(listener, http_app)
            .with_graceful_shutdown(async move { http_token.cancelled().await })
            .await
            .context("HTTP server")
    }));

    // gRPC
    let mut grpc_handle: Option<ServerHandle> = match &config.grpc_address {
        Some(address) => {
            let addr = resolve(address).await?;
            tracing::info!(addr = %addr, "gRPC listening");
            let service = grpc::server(&state);
            let grpc_token = token.clone();
            Some(tokio::spawn(async move {
                TonicServer::builder()
                    .add_service(service)
                    .serve_with_shutdown(addr, async move { grpc_token.cancelled().await })
                    .await
                    .context("gRPC server")
            }))
        }
        None => None,
    };

    // Either a signal or a listener exit ends the run.
    wait_for_exit(&token, &mut http_handle, &mut grpc_handle).await;

    tracing::info!(
        timeout_secs = config.shutdown_timeout_secs,
        "Draining in-flight requests"
    );
    let drain = async {
        if let Some(handle) = http_handle.as_mut() {
            report_exit("HTTP", handle.await);
        }
        if let Some(handle) = grpc_handle.as_mut() {
            report_exit("gRPC", handle.await);
        }
    };
    if tokio::time::timeout(config.shutdown_timeout(), drain).await.is_err() {
        tracing::warn!("Shutdown timeout reached, abandoning in-flight requests");
        for handle in http_handle.iter().chain(grpc_handle.iter()) {
            handle.abort();
        }
    }

    if let Some(handle) = snapshot_handle {
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }
    if let Some(durability) = &durability {
        durability.shutdown().await;
    }

    tracing::info!("telemon-server stopped");
    Ok(())
}

async fn resolve(address: &str) -> Result<SocketAddr> {
    tokio::net::lookup_host(address)
        .await
        .with_context(|| format!("resolving {address}"))?
        .next()
        .with_context(|| format!("{address} resolves to no address"))
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => tracing::info!("Received SIGINT, shutting down"),
                    _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                let _ = ctrl_c.await;
                tracing::info!("Received SIGINT, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
        tracing::info!("Received SIGINT, shutting down");
    }

    token.cancel();
}
