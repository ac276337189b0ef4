//! Envelope primitives shared by the agent (outbound) and the server
//! (inbound): HMAC-SHA256 body signing, chunked RSA-OAEP/SHA-256
//! encryption, and gzip framing.

use base64::{engine::general_purpose, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use hmac::{Hmac, Mac};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::io::{Read, Write};
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// HTTP header carrying the base64 MAC of the body.
pub const HASH_HEADER: &str = "HashSHA256";
/// HTTP header carrying the declared client address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";
/// gRPC metadata key carrying the base64 MAC of the encoded message.
pub const GRPC_HASH_KEY: &str = "hashsha256";
/// gRPC metadata key carrying the declared client address.
pub const GRPC_REAL_IP_KEY: &str = "x-real-ip";

/// SHA-256 output size; OAEP spends two of these plus two bytes per block.
const HASH_SIZE: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("Envelope: invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Envelope: RSA failure: {0}")]
    Crypto(#[from] rsa::Error),

    #[error("Envelope: ciphertext length {len} is not a multiple of the {block}-byte key size")]
    Misaligned { len: usize, block: usize },

    #[error("Envelope: invalid key: {0}")]
    Key(String),

    #[error("Envelope: MAC mismatch")]
    MacMismatch,

    #[error("Envelope: I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EnvelopeError>;

fn mac_for(body: &[u8], key: &[u8]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| EnvelopeError::Key(e.to_string()))?;
    mac.update(body);
    Ok(mac)
}

/// Returns `base64(HMAC-SHA256(body, key))`.
///
/// # Examples
///
/// ```
/// use telemon_common::crypto::{sign, verify};
///
/// let tag = sign(b"payload", b"k").unwrap();
/// assert!(verify(b"payload", b"k", &tag).is_ok());
/// assert!(verify(b"tampered", b"k", &tag).is_err());
/// ```
pub fn sign(body: &[u8], key: &[u8]) -> Result<String> {
    let tag = mac_for(body, key)?.finalize().into_bytes();
    Ok(general_purpose::STANDARD.encode(tag))
}

/// Verifies a base64 MAC in constant time.
pub fn verify(body: &[u8], key: &[u8], encoded_tag: &str) -> Result<()> {
    let tag = general_purpose::STANDARD.decode(encoded_tag.trim())?;
    mac_for(body, key)?
        .verify_slice(&tag)
        .map_err(|_| EnvelopeError::MacMismatch)
}

/// Loads an RSA private key from a PKCS#1 or PKCS#8 PEM file.
pub fn load_private_key(path: &Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPrivateKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPrivateKey::from_pkcs8_pem(&pem))
        .map_err(|e| EnvelopeError::Key(format!("{}: {e}", path.display())))
}

/// Loads an RSA public key from a PKCS#1 or SPKI PEM file.
pub fn load_public_key(path: &Path) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPublicKey::from_pkcs1_pem(&pem)
        .or_else(|_| RsaPublicKey::from_public_key_pem(&pem))
        .map_err(|e| EnvelopeError::Key(format!("{}: {e}", path.display())))
}

/// Largest plaintext block a key of this size can seal with OAEP/SHA-256.
pub fn plaintext_block_size(key: &RsaPublicKey) -> usize {
    key.size().saturating_sub(2 * HASH_SIZE + 2)
}

/// Encrypts `plain` block by block and concatenates the ciphertexts, each
/// of which is exactly `key.size()` bytes.
pub fn encrypt(key: &RsaPublicKey, plain: &[u8]) -> Result<Vec<u8>> {
    let block = plaintext_block_size(key);
    if block == 0 {
        return Err(EnvelopeError::Key("key too small for OAEP/SHA-256".into()));
    }
    let mut rng = rand::thread_rng();
    let mut out = Vec::with_capacity(plain.len().div_ceil(block) * key.size());
    for chunk in plain.chunks(block) {
        out.extend(key.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)?);
    }
    Ok(out)
}

/// Splits `cipher` into `key.size()` blocks and decrypts each in order.
pub fn decrypt(key: &RsaPrivateKey, cipher: &[u8]) -> Result<Vec<u8>> {
    let block = key.size();
    if cipher.len() % block != 0 {
        return Err(EnvelopeError::Misaligned {
            len: cipher.len(),
            block,
        });
    }
    let mut out = Vec::with_capacity(cipher.len());
    for chunk in cipher.chunks_exact(block) {
        out.extend(key.decrypt(Oaep::new::<Sha256>(), chunk)?);
    }
    Ok(out)
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}
