use crate::error::ServiceError;
use ip_network::IpNetwork;
use rsa::RsaPrivateKey;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use telemon_common::crypto;

/// Admits requests whose declared address (`X-Real-IP`) lies inside the
/// configured CIDR.
#[derive(Debug, Clone)]
pub enum SubnetFilter {
    Disabled,
    Network(IpNetwork),
    /// The configured CIDR did not parse; every request is refused as an
    /// internal error.
    Invalid(String),
}

impl SubnetFilter {
    pub fn new(cidr: Option<&str>) -> Self {
        match cidr.map(str::trim).filter(|c| !c.is_empty()) {
            None => SubnetFilter::Disabled,
            Some(cidr) => match IpNetwork::from_str_truncate(cidr) {
                Ok(network) => SubnetFilter::Network(network),
                Err(e) => SubnetFilter::Invalid(format!("trusted subnet {cidr:?}: {e}")),
            },
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, SubnetFilter::Disabled)
    }

    pub fn check(&self, real_ip: Option<&str>) -> Result<(), ServiceError> {
        let network = match self {
            SubnetFilter::Disabled => return Ok(()),
            SubnetFilter::Invalid(reason) => return Err(ServiceError::Internal(reason.clone())),
            SubnetFilter::Network(network) => network,
        };
        let raw = real_ip
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| ServiceError::PermissionDenied("missing client address".into()))?;
        let ip: IpAddr = raw
            .parse()
            .map_err(|_| ServiceError::PermissionDenied(format!("malformed client address {raw:?}")))?;
        if network.contains(ip) {
            Ok(())
        } else {
            Err(ServiceError::PermissionDenied(format!(
                "client address {ip} is outside the trusted subnet"
            )))
        }
    }
}

/// Everything the inbound envelope layers need, resolved once at startup.
#[derive(Debug, Clone)]
pub struct EnvelopeSettings {
    pub subnet: SubnetFilter,
    pub key: Option<Vec<u8>>,
    pub private_key: Option<Arc<RsaPrivateKey>>,
}

impl Default for EnvelopeSettings {
    fn default() -> Self {
        Self {
            subnet: SubnetFilter::Disabled,
            key: None,
            private_key: None,
        }
    }
}

impl EnvelopeSettings {
    pub fn new(
        trusted_subnet: Option<&str>,
        key: Option<&str>,
        crypto_key: Option<&Path>,
    ) -> Result<Self, crypto::EnvelopeError> {
        let private_key = crypto_key
            .map(crypto::load_private_key)
            .transpose()?
            .map(Arc::new);
        Ok(Self {
            subnet: SubnetFilter::new(trusted_subnet),
            key: key.filter(|k| !k.is_empty()).map(|k| k.as_bytes().to_vec()),
            private_key,
        })
    }
}
