use base64::{engine::general_purpose, Engine as _};
use rsa::RsaPublicKey;
use std::net::{IpAddr, UdpSocket};
use telemon_common::crypto::{self, EnvelopeError};

/// A request body after signing, encryption and compression.
#[derive(Debug, Clone)]
pub struct Sealed {
    pub body: Vec<u8>,
    /// Value for the `HashSHA256` header, when a key is configured.
    pub hash: Option<String>,
}

/// Outbound half of the ingest envelope.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    key: Option<Vec<u8>>,
    public_key: Option<RsaPublicKey>,
}

impl Envelope {
    pub fn new(key: Option<&str>, public_key: Option<RsaPublicKey>) -> Self {
        Self {
            key: key.map(|k| k.as_bytes().to_vec()),
            public_key,
        }
    }

    /// `base64(HMAC-SHA256(body))`, or `None` without a key.
    pub fn sign(&self, body: &[u8]) -> Result<Option<String>, EnvelopeError> {
        self.key
            .as_deref()
            .map(|key| crypto::sign(body, key))
            .transpose()
    }

    /// MAC over the plaintext, then chunked RSA and base64 if a public key
    /// is set, then gzip.
    pub fn seal(&self, body: &[u8]) -> Result<Sealed, EnvelopeError> {
        let hash = self.sign(body)?;
        let payload = match &self.public_key {
            Some(key) => general_purpose::STANDARD
                .encode(crypto::encrypt(key, body)?)
                .into_bytes(),
            None => body.to_vec(),
        };
        Ok(Sealed {
            body: crypto::gzip(&payload)?,
            hash,
        })
    }
}

/// Best-effort guess at the address this host uses for outbound traffic.
/// Connecting a UDP socket sends nothing; it only selects a route.
pub fn outbound_ip() -> Option<IpAddr> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_unspecified()).then_some(ip)
}
