//! Authoritative DNS server for the delegated zone.
//!
//! Serves A, AAAA, TXT, SOA and NS answers for names at or under the
//! configured apex, reading record data from the shared [store][crate::store]
//! on every query. Because the update API and the ACME challenge
//! coordinator write into the same store, a dynamic IP update or a freshly
//! installed `_acme-challenge` TXT value is visible to resolvers on the
//! very next query.
//!
//! # A/AAAA
//!
//! The stored IP set for a name is partitioned by address family: `A`
//! queries answer the IPv4 members, `AAAA` queries the IPv6 members. Each
//! address produces one RR with the configured `record_ttl` and the QNAME
//! echoed back verbatim.
//!
//! # TXT
//!
//! The stored TXT list produces one RR per value. ACME DNS-01 challenge
//! values live at `_acme-challenge.<name>` like any other TXT entry, which
//! is how the order driver's records become visible to the CA's resolvers.
//!
//! # SOA / NS
//!
//! Synthesised from config at the apex only. The SOA serial is the UTC
//! wall clock rendered as `YYYYMMDDHH`, so it never decreases across the
//! process lifetime. Timer values follow RIPE 203 recommendations.
//!
//! # Negative answers
//!
//! An empty answer section is authoritative with the SOA in the authority
//! section: `NXDOMAIN` when the name has no records at all, `NOERROR`
//! (NODATA) when it exists under another type. Store failures answer
//! `SERVFAIL` with the AA bit clear; resolvers retry, this layer does not.

pub mod handlers;

use crate::config::SharedConfig;
use crate::store::DynStore;
use anyhow::Context;
use tokio::net::{TcpListener, UdpSocket};
use trust_dns_server::ServerFuture;

/// Bind the zone's listeners and return the assembled server.
///
/// Both transports serve the same handler. UDP carries the bulk of query
/// traffic; TCP exists for responses that outgrow the datagram limit —
/// TXT answers during ACME validation in particular — and for resolvers
/// retrying after a truncated reply.
pub async fn new(
    config: SharedConfig,
    store: DynStore,
) -> anyhow::Result<ServerFuture<handlers::Handler>> {
    let udp = UdpSocket::bind(config.dns.udp_bind_addr)
        .await
        .with_context(|| format!("binding DNS UDP listener on {}", config.dns.udp_bind_addr))?;
    let tcp = TcpListener::bind(config.dns.tcp_bind_addr)
        .await
        .with_context(|| format!("binding DNS TCP listener on {}", config.dns.tcp_bind_addr))?;

    let tcp_timeout = config.dns.tcp_timeout;
    let mut server = ServerFuture::new(handlers::Handler::new(config, store));
    server.register_socket(udp);
    server.register_listener(tcp, tcp_timeout);
    Ok(server)
}
