//! Certificate blob codec.
//!
//! A blob is concatenated PEM: one private-key block (PKCS#8 as written by
//! the order driver; `EC PRIVATE KEY` and `RSA PRIVATE KEY` blobs are also
//! accepted) followed by one or more `CERTIFICATE` blocks, leaf first.

use crate::error::Error;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use std::io::Cursor;
use std::sync::Arc;
use time::OffsetDateTime;

/// A decoded certificate entry, ready for handshakes and for the
/// certificate API.
#[derive(Debug)]
pub struct CachedCert {
    /// The stored blob, byte for byte.
    pub blob: Vec<u8>,
    /// The private-key portion of the blob.
    pub key_pem: String,
    /// The certificate-chain portion of the blob, leaf first.
    pub chain_pem: String,
    /// Leaf `notAfter`.
    pub not_after: OffsetDateTime,
    /// Ready-to-use server configuration for this name.
    pub server_config: Arc<ServerConfig>,
}

impl CachedCert {
    pub fn expired(&self, now: OffsetDateTime) -> bool {
        self.not_after <= now
    }

    /// Whether the leaf is close enough to expiry that renewal should run.
    pub fn within_renewal(&self, now: OffsetDateTime, window: time::Duration) -> bool {
        self.not_after <= now + window
    }
}

/// Serialise a key + chain pair into the blob format.
pub fn encode_bundle(key_pem: &str, chain_pem: &str) -> Vec<u8> {
    let mut blob = Vec::with_capacity(key_pem.len() + chain_pem.len() + 1);
    blob.extend_from_slice(key_pem.as_bytes());
    if !key_pem.ends_with('\n') {
        blob.push(b'\n');
    }
    blob.extend_from_slice(chain_pem.as_bytes());
    blob
}

/// Decode a blob into a [`CachedCert`].
pub fn decode_bundle(blob: &[u8]) -> Result<CachedCert, Error> {
    let mut certs: Vec<CertificateDer<'static>> = Vec::new();
    let mut key: Option<PrivateKeyDer<'static>> = None;

    let mut reader = Cursor::new(blob);
    for item in rustls_pemfile::read_all(&mut reader) {
        let item = item.map_err(|err| Error::InvalidCertificate(err.to_string()))?;
        match item {
            rustls_pemfile::Item::X509Certificate(der) => certs.push(der),
            rustls_pemfile::Item::Pkcs8Key(der) if key.is_none() => {
                key = Some(PrivateKeyDer::Pkcs8(der));
            }
            rustls_pemfile::Item::Sec1Key(der) if key.is_none() => {
                key = Some(PrivateKeyDer::Sec1(der));
            }
            rustls_pemfile::Item::Pkcs1Key(der) if key.is_none() => {
                key = Some(PrivateKeyDer::Pkcs1(der));
            }
            _ => {}
        }
    }

    let key = key.ok_or_else(|| Error::InvalidCertificate("no private key block".to_string()))?;
    if certs.is_empty() {
        return Err(Error::InvalidCertificate(
            "no certificate blocks".to_string(),
        ));
    }

    let not_after = leaf_not_after(&certs[0])?;
    let (key_pem, chain_pem) = split_blob(blob)?;

    let server_config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| Error::InvalidCertificate(err.to_string()))?;

    Ok(CachedCert {
        blob: blob.to_vec(),
        key_pem,
        chain_pem,
        not_after,
        server_config: Arc::new(server_config),
    })
}

fn leaf_not_after(leaf: &CertificateDer<'_>) -> Result<OffsetDateTime, Error> {
    use x509_parser::prelude::*;

    let (_, cert) = X509Certificate::from_der(leaf.as_ref())
        .map_err(|err| Error::InvalidCertificate(err.to_string()))?;
    let timestamp = cert.validity().not_after.timestamp();
    OffsetDateTime::from_unix_timestamp(timestamp)
        .map_err(|err| Error::InvalidCertificate(err.to_string()))
}

/// Split the blob text at the first certificate block.
fn split_blob(blob: &[u8]) -> Result<(String, String), Error> {
    let text = std::str::from_utf8(blob)
        .map_err(|_| Error::InvalidCertificate("blob is not UTF-8 PEM".to_string()))?;
    let idx = text
        .find("-----BEGIN CERTIFICATE-----")
        .ok_or_else(|| Error::InvalidCertificate("no certificate blocks".to_string()))?;
    Ok((text[..idx].to_string(), text[idx..].to_string()))
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use super::*;

    /// Self-signed key + chain for `name`, expiring `days_valid` from now.
    pub fn self_signed(name: &str, days_valid: i64) -> (String, String) {
        let key = rcgen::KeyPair::generate().unwrap();
        let mut params = rcgen::CertificateParams::new(vec![name.to_string()]).unwrap();
        params.not_before = OffsetDateTime::now_utc() - time::Duration::days(1);
        params.not_after = OffsetDateTime::now_utc() + time::Duration::days(days_valid);
        let cert = params.self_signed(&key).unwrap();
        (key.serialize_pem(), cert.pem())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blob_round_trips() {
        let (key_pem, chain_pem) = test_fixtures::self_signed("host.dyn.example.org", 90);
        let blob = encode_bundle(&key_pem, &chain_pem);
        let cached = decode_bundle(&blob).unwrap();

        assert_eq!(cached.blob, blob);
        assert!(cached.key_pem.contains("PRIVATE KEY"));
        assert!(cached.chain_pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(!cached.expired(OffsetDateTime::now_utc()));
    }

    #[test]
    fn expiry_is_read_from_the_leaf() {
        let (key_pem, chain_pem) = test_fixtures::self_signed("host.dyn.example.org", 10);
        let cached = decode_bundle(&encode_bundle(&key_pem, &chain_pem)).unwrap();

        let now = OffsetDateTime::now_utc();
        assert!(!cached.expired(now));
        assert!(cached.within_renewal(now, time::Duration::days(30)));
        assert!(!cached.within_renewal(now, time::Duration::days(5)));
    }

    #[test]
    fn expired_leaf_is_detected() {
        let (key_pem, chain_pem) = test_fixtures::self_signed("host.dyn.example.org", -1);
        let cached = decode_bundle(&encode_bundle(&key_pem, &chain_pem)).unwrap();
        assert!(cached.expired(OffsetDateTime::now_utc()));
    }

    #[test]
    fn rejects_blob_without_key() {
        let (_, chain_pem) = test_fixtures::self_signed("host.dyn.example.org", 90);
        assert!(matches!(
            decode_bundle(chain_pem.as_bytes()),
            Err(Error::InvalidCertificate(_))
        ));
    }

    #[test]
    fn rejects_blob_without_certificates() {
        let (key_pem, _) = test_fixtures::self_signed("host.dyn.example.org", 90);
        assert!(matches!(
            decode_bundle(key_pem.as_bytes()),
            Err(Error::InvalidCertificate(_))
        ));
    }
}
