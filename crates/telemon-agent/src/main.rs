use anyhow::Result;
use clap::Parser;
use stats_alloc::{StatsAlloc, INSTRUMENTED_SYSTEM};
use std::alloc::System;
use std::sync::Arc;
use std::time::Duration;
use telemon_agent::config::{AgentConfig, Cli};
use telemon_agent::reporter::Reporter;
use telemon_agent::sampler::Sampler;
use telemon_agent::table::MetricTable;
use telemon_agent::transport;
use telemon_collector::{Collector, CpuCollector, MemoryCollector, RuntimeCollector};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: &StatsAlloc<System> = &INSTRUMENTED_SYSTEM;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("telemon=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = AgentConfig::load(&cli)?;
    tracing::info!(
        server = %config.server_url(),
        poll_secs = config.poll_interval_secs,
        report_secs = config.report_interval_secs,
        transport = ?config.transport,
        batch = config.batch,
        rate_limit = config.rate_limit,
        signed = config.key.is_some(),
        encrypted = config.crypto_key.is_some(),
        "telemon-agent starting"
    );

    let collectors: Vec<Box<dyn Collector>> = vec![
        Box::new(RuntimeCollector::new(GLOBAL)?),
        Box::new(MemoryCollector::new()),
        Box::new(CpuCollector::new()),
    ];

    let table = Arc::new(MetricTable::new());
    let sampler = Sampler::new(collectors, table.clone());
    let reporter = Reporter::new(
        table,
        transport::from_config(&config)?,
        config.rate_limit,
        config.batch,
    );

    let token = CancellationToken::new();
    tokio::spawn(shutdown_signal(token.clone()));

    telemon_agent::run(
        sampler,
        reporter,
        Duration::from_secs(config.poll_interval_secs),
        Duration::from_secs(config.report_interval_secs),
        token,
    )
    .await;

    tracing::info!("telemon-agent stopped");
    Ok(())
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
