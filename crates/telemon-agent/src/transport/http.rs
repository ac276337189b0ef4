use super::Transport;
use crate::envelope::Envelope;
use anyhow::{bail, Result};
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use std::net::IpAddr;
use std::time::Duration;
use telemon_common::crypto::{HASH_HEADER, REAL_IP_HEADER};
use telemon_common::types::{Metric, MetricDto};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON over HTTP through the full outbound envelope.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    envelope: Envelope,
    real_ip: Option<IpAddr>,
}

impl HttpTransport {
    pub fn new(base_url: &str, envelope: Envelope, real_ip: Option<IpAddr>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            envelope,
            real_ip,
        })
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<()> {
        let sealed = self.envelope.seal(&body)?;

        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, "gzip")
            .body(sealed.body);
        if let Some(hash) = sealed.hash {
            request = request.header(HASH_HEADER, hash);
        }
        if let Some(ip) = self.real_ip {
            request = request.header(REAL_IP_HEADER, ip.to_string());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            bail!("POST {path} returned {status}: {text}");
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send_batch(&self, metrics: &[Metric]) -> Result<()> {
        let dtos: Vec<MetricDto> = metrics.iter().map(MetricDto::from).collect();
        self.post("/updates/", serde_json::to_vec(&dtos)?).await
    }

    async fn send_one(&self, metric: &Metric) -> Result<()> {
        self.post("/update/", serde_json::to_vec(&MetricDto::from(metric))?)
            .await
    }
}
