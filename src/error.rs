//! Error types.

use trust_dns_proto::error::ProtoError;

/// Error enumerates the failure states surfaced by dynward's components.
///
/// Each layer translates upstream failures into this taxonomy before
/// surfacing them: the DNS responder answers `SERVFAIL` for [`Error::Timeout`]
/// and store failures, the update API answers the dyndns `dnserr`/`notfqdn`
/// tokens, and the certificate path aborts the handshake.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A store or ACME operation exceeded its deadline.
    #[error("operation timed out")]
    Timeout,

    /// A hostname failed the syntax check or the certificate whitelist.
    #[error("\"{0}\" is not an acceptable hostname")]
    InvalidName(String),

    /// No records exist for the name.
    #[error("no records for \"{0}\"")]
    NotFound(String),

    /// A certificate acquisition is still in flight and the caller asked
    /// not to block.
    #[error("certificate for \"{0}\" is not yet available")]
    NotYetAvailable(String),

    /// An ACME order failed terminally.
    #[error("certificate order failed: {0}")]
    AcmeFailed(String),

    /// A retryable infrastructure failure; retried with backoff inside the
    /// component that understands it and surfaced only on deadline.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The configuration file was missing a requirement.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A certificate blob could not be decoded.
    #[error("invalid certificate blob: {0}")]
    InvalidCertificate(String),

    /// Returned when a generic IO error occurs.
    #[error("an IO error occurred")]
    Io(#[from] std::io::Error),

    /// Returned when serialised store state can't be encoded or decoded.
    #[error("invalid JSON")]
    InvalidJson(#[from] serde_json::Error),

    /// Returned when the DNS server encounters a generic protocol error.
    #[error("DNS error")]
    Dns(#[from] ProtoError),
}

impl Error {
    /// Clone the observable outcome of an error.
    ///
    /// Single-flight followers receive the leader's result through a shared
    /// channel; variants that wrap non-clonable sources collapse to
    /// [`Error::Transient`] with the same message.
    pub fn duplicate(&self) -> Self {
        match self {
            Error::Timeout => Error::Timeout,
            Error::InvalidName(n) => Error::InvalidName(n.clone()),
            Error::NotFound(n) => Error::NotFound(n.clone()),
            Error::NotYetAvailable(n) => Error::NotYetAvailable(n.clone()),
            Error::AcmeFailed(m) => Error::AcmeFailed(m.clone()),
            Error::Transient(m) => Error::Transient(m.clone()),
            Error::Config(m) => Error::Config(m.clone()),
            Error::InvalidCertificate(m) => Error::InvalidCertificate(m.clone()),
            other => Error::Transient(other.to_string()),
        }
    }
}
