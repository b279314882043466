//! Durable record storage.
//!
//! One flat keyspace backs every component: the update API writes IP sets,
//! the challenge coordinator writes ACME TXT values, the certificate cache
//! writes certificate blobs, and the zone responder reads all of it. Keys
//! are prefixed by kind:
//!
//! - `ips:<name>` — serialised IP set
//! - `txt:<name>` — serialised string list
//! - `cert:<name>` — certificate blob (PEM key + chain)
//! - `acme-account` — serialised ACME account credentials
//!
//! Sharing the keyspace between user TXT records and ACME challenge records
//! is deliberate: the authoritative server needs no privileged path to see
//! challenges.
//!
//! Two implementations are provided, [`memory::MemoryStore`] and
//! [`file::FileStore`]. The former is not durable across restarts; the
//! latter keeps one file per key and replaces files atomically.

use crate::error::Error;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Store shared by every component.
pub type DynStore = Arc<dyn Store + Send + Sync>;

pub(crate) const IP_PREFIX: &str = "ips:";
pub(crate) const TXT_PREFIX: &str = "txt:";
pub(crate) const CERT_PREFIX: &str = "cert:";
pub(crate) const ACME_ACCOUNT_KEY: &str = "acme-account";

/// Default deadline for store operations on the DNS answer path.
pub const DNS_DEADLINE: Duration = Duration::from_secs(1);
/// Default deadline for store operations on the API path.
pub const API_DEADLINE: Duration = Duration::from_secs(10);

/// Apply a deadline to a store (or any fallible) operation.
///
/// Elapsed timers surface as [`Error::Timeout`]; the underlying future is
/// dropped, which for the file store means the temp file is abandoned and
/// the previous value stays committed.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, Error>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(res) => res,
        Err(_) => Err(Error::Timeout),
    }
}

/// Async trait describing the durable map from names to record sets.
///
/// All keys are normalised hostnames (lowercase, no trailing dot).
/// Implementations lock internally; concurrent readers and writers on
/// distinct keys do not interfere, writes are atomic per key, and reads
/// return the last committed value. Missing keys read as empty sets (or
/// `None` for blobs), never as errors.
#[async_trait::async_trait]
pub trait Store {
    /// Get the IP set for `name`; empty when absent.
    async fn get_ips(&self, name: &str) -> Result<Vec<IpAddr>, Error>;

    /// Replace the IP set for `name`. An empty set prunes the key.
    async fn put_ips(&self, name: &str, addrs: Vec<IpAddr>) -> Result<(), Error>;

    /// Delete the IP set for `name`; deleting an absent key is not an error.
    async fn delete_ips(&self, name: &str) -> Result<(), Error>;

    /// Get the TXT values for `name`; empty when absent.
    async fn get_txt(&self, name: &str) -> Result<Vec<String>, Error>;

    /// Replace the TXT values for `name`. An empty list prunes the key.
    async fn put_txt(&self, name: &str, values: Vec<String>) -> Result<(), Error>;

    /// Delete the TXT values for `name`; deleting an absent key is not an
    /// error.
    async fn delete_txt(&self, name: &str) -> Result<(), Error>;

    /// Get the certificate blob for `name`.
    async fn get_cert(&self, name: &str) -> Result<Option<Vec<u8>>, Error>;

    /// Replace the certificate blob for `name`.
    async fn put_cert(&self, name: &str, blob: &[u8]) -> Result<(), Error>;

    /// Delete the certificate blob for `name`.
    async fn delete_cert(&self, name: &str) -> Result<(), Error>;

    /// Get the serialised ACME account credentials, if any. Stored under a
    /// reserved key, never served over DNS or TLS.
    async fn get_acme_account(&self) -> Result<Option<Vec<u8>>, Error>;

    /// Persist the serialised ACME account credentials.
    async fn put_acme_account(&self, blob: &[u8]) -> Result<(), Error>;

    /// Whether any A/AAAA or TXT records exist for `name`.
    async fn domain_exists(&self, name: &str) -> Result<bool, Error> {
        Ok(!self.get_ips(name).await?.is_empty() || !self.get_txt(name).await?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_elapses_to_timeout() {
        let res: Result<(), Error> = with_deadline(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn deadline_passes_value_through() {
        let res = with_deadline(Duration::from_secs(1), async { Ok(7u32) }).await;
        assert_eq!(res.unwrap(), 7);
    }
}
