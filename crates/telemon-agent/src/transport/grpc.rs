use super::Transport;
use crate::envelope::Envelope;
use anyhow::Result;
use async_trait::async_trait;
use prost::Message;
use std::net::IpAddr;
use std::time::Duration;
use telemon_common::crypto::{GRPC_HASH_KEY, GRPC_REAL_IP_KEY};
use telemon_common::proto::metrics_client::MetricsClient;
use telemon_common::proto::{BulkUpdateRequest, MetricProto};
use telemon_common::types::Metric;
use tonic::transport::{Channel, Endpoint};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Protobuf over gRPC. The MAC covers the encoded request message and
/// travels in metadata alongside the declared client address.
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    envelope: Envelope,
    real_ip: Option<IpAddr>,
}

impl GrpcTransport {
    /// The channel connects lazily, so a server that is down at startup
    /// only fails individual reports.
    pub fn new(url: &str, envelope: Envelope, real_ip: Option<IpAddr>) -> Result<Self> {
        let channel = Endpoint::from_shared(url.to_string())?
            .timeout(REQUEST_TIMEOUT)
            .connect_lazy();
        Ok(Self {
            client: MetricsClient::new(channel),
            envelope,
            real_ip,
        })
    }

    fn request<T: Message>(&self, message: T) -> Result<tonic::Request<T>> {
        let hash = self.envelope.sign(&message.encode_to_vec())?;
        let mut request = tonic::Request::new(message);
        let metadata = request.metadata_mut();
        if let Some(hash) = hash {
            metadata.insert(GRPC_HASH_KEY, hash.parse()?);
        }
        if let Some(ip) = self.real_ip {
            metadata.insert(GRPC_REAL_IP_KEY, ip.to_string().parse()?);
        }
        Ok(request)
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    async fn send_batch(&self, metrics: &[Metric]) -> Result<()> {
        let request = self.request(BulkUpdateRequest {
            metrics: metrics.iter().map(MetricProto::from).collect(),
        })?;
        self.client.clone().bulk_update(request).await?;
        Ok(())
    }

    async fn send_one(&self, metric: &Metric) -> Result<()> {
        let request = self.request(MetricProto::from(metric))?;
        self.client.clone().update(request).await?;
        Ok(())
    }
}
