//! Certificate storage format and the single-flight certificate cache.
//!
//! Certificates are stored as one opaque blob per subject name:
//! concatenated PEM with the private key block first and the certificate
//! chain after it, leaf first. The cache decodes blobs into ready-to-serve
//! rustls configurations, acquires missing or expired certificates through
//! the [ACME order driver][crate::acme], and makes sure racing handshakes
//! for the same cold name share a single order.

pub mod cache;
pub mod pem;

pub use cache::CertCache;
pub use pem::CachedCert;
