//! Delivery of metrics to the server over HTTP or gRPC.

pub mod grpc;
pub mod http;

use crate::config::{AgentConfig, TransportKind};
use crate::envelope::{outbound_ip, Envelope};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use telemon_common::crypto;
use telemon_common::types::Metric;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends every metric in one request.
    async fn send_batch(&self, metrics: &[Metric]) -> Result<()>;

    async fn send_one(&self, metric: &Metric) -> Result<()>;
}

/// Builds the transport selected by `config`.
pub fn from_config(config: &AgentConfig) -> Result<Arc<dyn Transport>> {
    let public_key = config
        .crypto_key
        .as_deref()
        .map(crypto::load_public_key)
        .transpose()
        .context("loading server public key")?;
    let envelope = Envelope::new(config.key.as_deref(), public_key);
    let real_ip = outbound_ip();
    tracing::info!(real_ip = ?real_ip, transport = ?config.transport, "Resolved outbound address");

    let url = config.server_url();
    let transport: Arc<dyn Transport> = match config.transport {
        TransportKind::Http => Arc::new(HttpTransport::new(&url, envelope, real_ip)?),
        TransportKind::Grpc => Arc::new(GrpcTransport::new(&url, envelope, real_ip)?),
    };
    Ok(transport)
}
