use crate::envelope::SubnetFilter;
use crate::error::ServiceError;
use crate::service::MetricsService;
use crate::state::AppState;
use prost::Message;
use std::sync::Arc;
use telemon_common::convert::kind_name;
use telemon_common::crypto::{self, GRPC_HASH_KEY, GRPC_REAL_IP_KEY};
use telemon_common::proto::metrics_server::{Metrics, MetricsServer};
use telemon_common::proto::{
    BulkUpdateRequest, BulkUpdateResponse, IndexRequest, IndexResponse, MetricProto, PingRequest,
    PingResponse, ShowRequest,
};
use telemon_common::types::{MetricDto, MetricQuery};
use tonic::codegen::InterceptedService;
use tonic::metadata::MetadataValue;
use tonic::service::Interceptor;
use tonic::{Request, Response, Status};

/// gRPC face of [`MetricsService`].
///
/// With a shared key configured, every non-empty request message must carry
/// `hashsha256` metadata over its protobuf encoding, and every response is
/// signed the same way.
pub struct MetricsGrpc {
    service: Arc<MetricsService>,
    key: Option<Vec<u8>>,
}

impl MetricsGrpc {
    pub fn new(state: &AppState) -> Self {
        Self {
            service: state.service.clone(),
            key: state.envelope.key.clone(),
        }
    }

    fn verify<T: Message>(&self, request: &Request<T>) -> Result<(), Status> {
        let Some(key) = &self.key else {
            return Ok(());
        };
        let body = request.get_ref().encode_to_vec();
        if body.is_empty() {
            return Ok(());
        }
        let tag = request
            .metadata()
            .get(GRPC_HASH_KEY)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::InvalidArgument(format!("missing {GRPC_HASH_KEY} metadata"))
            })?;
        crypto::verify(&body, key, tag).map_err(|e| {
            tracing::warn!(error = %e, "gRPC request MAC rejected");
            ServiceError::from(e)
        })?;
        Ok(())
    }

    fn respond<T: Message>(&self, message: T) -> Result<Response<T>, Status> {
        let tag = match &self.key {
            Some(key) => Some(crypto::sign(&message.encode_to_vec(), key).map_err(ServiceError::from)?),
            None => None,
        };
        let mut response = Response::new(message);
        if let Some(tag) = tag {
            let value = MetadataValue::try_from(tag.as_str())
                .map_err(|e| Status::internal(format!("invalid MAC metadata: {e}")))?;
            response.metadata_mut().insert(GRPC_HASH_KEY, value);
        }
        Ok(response)
    }
}

#[tonic::async_trait]
impl Metrics for MetricsGrpc {
    async fn update(&self, request: Request<MetricProto>) -> Result<Response<MetricProto>, Status> {
        self.verify(&request)?;
        let dto = MetricDto::from(request.into_inner());
        let stored = self.service.add(&dto).await?;
        self.respond(MetricProto::from(&stored))
    }

    async fn bulk_update(
        &self,
        request: Request<BulkUpdateRequest>,
    ) -> Result<Response<BulkUpdateResponse>, Status> {
        self.verify(&request)?;
        let dtos: Vec<MetricDto> = request
            .into_inner()
            .metrics
            .into_iter()
            .map(MetricDto::from)
            .collect();
        let stored = self.service.bulk_add(&dtos).await?;
        tracing::debug!(count = stored.len(), "gRPC bulk update stored");
        self.respond(BulkUpdateResponse {
            metrics: stored.iter().map(MetricProto::from).collect(),
        })
    }

    async fn show(&self, request: Request<ShowRequest>) -> Result<Response<MetricProto>, Status> {
        self.verify(&request)?;
        let ShowRequest { id, kind } = request.into_inner();
        let query = MetricQuery {
            id,
            kind: kind_name(kind),
        };
        let metric = self.service.find(&query).await?;
        self.respond(MetricProto::from(&metric))
    }

    async fn index(&self, request: Request<IndexRequest>) -> Result<Response<IndexResponse>, Status> {
        self.verify(&request)?;
        let metrics = self.service.get_all().await?;
        self.respond(IndexResponse {
            metrics: metrics.iter().map(MetricProto::from).collect(),
        })
    }

    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        self.verify(&request)?;
        self.service.ping().await?;
        self.respond(PingResponse {})
    }
}

/// Trusted-subnet check on the `x-real-ip` metadata entry.
#[derive(Clone)]
pub struct SubnetInterceptor {
    filter: SubnetFilter,
}

impl SubnetInterceptor {
    pub fn new(filter: SubnetFilter) -> Self {
        Self { filter }
    }
}

impl Interceptor for SubnetInterceptor {
    fn call(&mut self, request: Request<()>) -> Result<Request<()>, Status> {
        let real_ip = request
            .metadata()
            .get(GRPC_REAL_IP_KEY)
            .and_then(|v| v.to_str().ok());
        if let Err(e) = self.filter.check(real_ip) {
            tracing::warn!(real_ip = real_ip.unwrap_or("-"), error = %e, "gRPC call rejected by subnet filter");
            return Err(e.into());
        }
        Ok(request)
    }
}

pub fn server(state: &AppState) -> InterceptedService<MetricsServer<MetricsGrpc>, SubnetInterceptor> {
    MetricsServer::with_interceptor(
        MetricsGrpc::new(state),
        SubnetInterceptor::new(state.envelope.subnet.clone()),
    )
}
