//! Telemetry collector: gauge and counter aggregation behind an HTTP and a
//! gRPC surface, with file snapshots for the in-memory store.

pub mod api;
pub mod app;
pub mod config;
pub mod durability;
pub mod envelope;
pub mod error;
pub mod grpc;
pub mod logging;
pub mod middleware;
pub mod service;
pub mod state;

use anyhow::Context;
use config::ServerConfig;
use durability::Durability;
use envelope::EnvelopeSettings;
use service::MetricsService;
use state::AppState;
use std::sync::Arc;
use telemon_storage::{DbStorage, MemStorage, Storage};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// A spawned listener task.
pub type ServerHandle = JoinHandle<anyhow::Result<()>>;

/// The composed server, ready to be bound to listeners.
pub struct Components {
    pub state: AppState,
    /// Present only for the in-memory store with a snapshot file.
    pub durability: Option<Arc<Durability>>,
}

/// Builds storage, durability, service and envelope settings in that
/// order, restoring the snapshot when asked to.
pub async fn bootstrap(config: &ServerConfig) -> anyhow::Result<Components> {
    let (storage, durability): (Arc<dyn Storage>, Option<Arc<Durability>>) =
        match &config.database_dsn {
            Some(dsn) => {
                let storage = DbStorage::connect(dsn)
                    .await
                    .context("connecting to the metrics database")?;
                tracing::info!("Using relational storage; file snapshots disabled");
                (Arc::new(storage), None)
            }
            None => {
                let storage: Arc<dyn Storage> = Arc::new(MemStorage::new());
                let durability = config.snapshot_path().map(|path| {
                    Arc::new(Durability::new(
                        storage.clone(),
                        path,
                        config.durability_mode(),
                    ))
                });
                (storage, durability)
            }
        };

    if let Some(durability) = &durability {
        if config.restore {
            durability.restore().await;
        }
    }

    let envelope = EnvelopeSettings::new(
        config.trusted_subnet.as_deref(),
        config.key.as_deref(),
        config.crypto_key.as_deref(),
    )
    .context("loading envelope settings")?;

    let service = Arc::new(MetricsService::new(storage, durability.clone()));
    Ok(Components {
        state: AppState::new(service, envelope),
        durability,
    })
}

async fn join(handle: &mut Option<ServerHandle>) -> Result<anyhow::Result<()>, JoinError> {
    match handle.as_mut() {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

/// Returns once `token` is cancelled or either listener exits. A listener
/// that exits first is logged, taken out of its slot, and cancels `token`
/// so the other one drains too.
pub async fn wait_for_exit(
    token: &CancellationToken,
    http: &mut Option<ServerHandle>,
    grpc: &mut Option<ServerHandle>,
) {
    let http_exited = tokio::select! {
        _ = token.cancelled() => return,
        result = join(http) => {
            report_exit("HTTP", result);
            true
        }
        result = join(grpc) => {
            report_exit("gRPC", result);
            false
        }
    };
    if http_exited {
        *http = None;
    } else {
        *grpc = None;
    }
    token.cancel();
}

pub fn report_exit(name: &str, result: Result<anyhow::Result<()>, JoinError>) {
    match result {
        Ok(Ok(())) => tracing::info!(server = name, "Server stopped"),
        Ok(Err(e)) => tracing::error!(server = name, error = %e, "Server error"),
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!(server = name, error = %e, "Server task failed"),
    }
}
