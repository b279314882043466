//! dynward
//!
//! A self-hosted dynamic-DNS service that is also the authoritative name
//! server for its own delegated zone and obtains publicly trusted X.509
//! certificates for the names it publishes.
//!
//! Clients behind NAT push their current addresses over a small
//! [HTTPS API][crate::api]; the [authoritative server][crate::dns] answers
//! queries for those names straight from the shared [store][crate::store].
//! Because the zone is self-hosted, [RFC-8555][RFC-8555] [DNS-01]
//! challenges can be satisfied without any external DNS provider: the
//! [ACME driver][crate::acme] installs the challenge TXT record in the same
//! store the responder reads, and the [certificate cache][crate::cert]
//! serves and renews certificates on demand — both for this server's own
//! TLS listener and for clients fetching a key + chain to terminate TLS
//! locally under a real name.
//!
//! [RFC-8555]: https://www.rfc-editor.org/rfc/rfc8555
//! [DNS-01]: https://www.rfc-editor.org/rfc/rfc8555#section-8.4
//!
#![warn(clippy::pedantic)]

pub mod acme;
pub mod api;
pub mod cert;
pub mod config;
pub mod dns;
pub mod error;
pub mod hostname;
pub mod store;
pub mod tls;

pub use cert::CertCache;
pub use config::{Config, SharedConfig};
pub use error::Error;
pub use store::{FileStore, MemoryStore};
