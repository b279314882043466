//! TLS termination with on-demand certificates.
//!
//! rustls resolves server certificates through a synchronous callback, which
//! cannot wait on an ACME order. Instead the accept loop completes each
//! handshake lazily: read the ClientHello, look the SNI name up in the
//! certificate cache (acquiring through ACME on a cold name), then finish
//! the handshake with a per-name server configuration and hand the stream
//! to the HTTP API router.

use crate::cert::cache::SYNC_DEADLINE;
use crate::cert::CertCache;
use crate::error::Error;
use axum::Router;
use hyper::server::conn::Http;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, info};

/// Accept TLS connections on `addr` forever, serving `router` over each.
pub async fn serve(addr: SocketAddr, router: Router, certs: Arc<CertCache>) -> Result<(), Error> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTPS listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let router = router.clone();
        let certs = certs.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, router, certs).await {
                debug!(%peer, error = %err, "connection closed with error");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    router: Router,
    certs: Arc<CertCache>,
) -> Result<(), Error> {
    let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream);
    let start = acceptor.await?;

    let sni = match start.client_hello().server_name() {
        Some(name) => name.to_string(),
        None => {
            debug!("ClientHello without SNI, closing");
            return Ok(());
        }
    };

    // Aborting before `into_stream` drops the connection; the client sees
    // a handshake failure rather than a served error page.
    let cached = certs.get_certificate(&sni, SYNC_DEADLINE).await?;
    let tls_stream = start.into_stream(cached.server_config.clone()).await?;

    Http::new()
        .serve_connection(tls_stream, router)
        .await
        .map_err(|err| Error::Transient(err.to_string()))
}
