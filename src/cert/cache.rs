//! Single-flight certificate cache.
//!
//! `get_certificate` backs both the TLS handshake callback (keyed by SNI)
//! and the certificate API. A hit decodes the stored blob and returns; a
//! miss or an expired leaf triggers one ACME order per name no matter how
//! many callers race for it. Callers that lose the race wait on the
//! winner's completion channel and observe the same outcome.

use crate::acme::Acquire;
use crate::cert::pem::{self, CachedCert};
use crate::config::SharedConfig;
use crate::error::Error;
use crate::hostname;
use crate::store::{self, DynStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Deadline for a synchronous acquisition on the handshake path.
pub const SYNC_DEADLINE: Duration = Duration::from_secs(60);
/// Deadline for a background renewal.
const RENEWAL_DEADLINE: Duration = Duration::from_secs(600);

type FlightOutcome = Result<Arc<CachedCert>, Arc<Error>>;
type FlightReceiver = watch::Receiver<Option<FlightOutcome>>;

/// Cache of certificate entries keyed by subject name.
pub struct CertCache {
    config: SharedConfig,
    store: DynStore,
    acquirer: Arc<dyn Acquire>,
    // Guarded map of in-flight acquisitions; entries are removed on every
    // exit path. The mutex is never held across an await.
    inflight: Mutex<HashMap<String, FlightReceiver>>,
}

enum Role {
    Leader(watch::Sender<Option<FlightOutcome>>),
    Follower(FlightReceiver),
}

/// Removes the in-flight entry even when the leader's future is dropped
/// mid-acquisition, so an aborted flight never wedges the name.
struct FlightGuard<'a> {
    cache: &'a CertCache,
    name: &'a str,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.cache.inflight.lock().unwrap().remove(self.name);
    }
}

impl CertCache {
    pub fn new(config: SharedConfig, store: DynStore, acquirer: Arc<dyn Acquire>) -> Arc<Self> {
        Arc::new(CertCache {
            config,
            store,
            acquirer,
            inflight: Mutex::new(HashMap::new()),
        })
    }

    /// Resolve a certificate for `sni`.
    ///
    /// Returns the cached entry when the leaf is fresh, triggering a
    /// background renewal when it is inside the renewal window. A missing
    /// or expired entry blocks on acquisition up to `deadline`; a zero
    /// `deadline` makes the call non-blocking and reports
    /// [`Error::NotYetAvailable`] while the acquisition proceeds in the
    /// background.
    pub async fn get_certificate(
        self: &Arc<Self>,
        sni: &str,
        deadline: Duration,
    ) -> Result<Arc<CachedCert>, Error> {
        let name = hostname::normalize(sni);
        if !hostname::valid_hostname(&name) || !self.config.cert_allowed(&name) {
            return Err(Error::InvalidName(name));
        }

        let now = OffsetDateTime::now_utc();
        if let Some(blob) =
            store::with_deadline(store::API_DEADLINE, self.store.get_cert(&name)).await?
        {
            match pem::decode_bundle(&blob) {
                Ok(cached) if !cached.expired(now) => {
                    let cached = Arc::new(cached);
                    if cached.within_renewal(now, self.renew_window()) {
                        self.spawn_background_acquisition(&name);
                    }
                    return Ok(cached);
                }
                Ok(_) => debug!(%name, "cached certificate expired, reacquiring"),
                Err(err) => {
                    warn!(%name, error = %err, "cached certificate blob unusable, reacquiring");
                }
            }
        }

        if deadline.is_zero() {
            self.spawn_background_acquisition(&name);
            return Err(Error::NotYetAvailable(name));
        }

        self.obtain(&name, deadline).await
    }

    fn renew_window(&self) -> time::Duration {
        time::Duration::days(self.config.acme.renew_before_days)
    }

    /// Join or lead the single flight for `name`.
    async fn obtain(self: &Arc<Self>, name: &str, deadline: Duration) -> Result<Arc<CachedCert>, Error> {
        let role = {
            let mut inflight = self.inflight.lock().unwrap();
            match inflight.get(name) {
                Some(rx) => Role::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    inflight.insert(name.to_string(), rx);
                    Role::Leader(tx)
                }
            }
        };

        match role {
            Role::Follower(mut rx) => loop {
                let settled = rx.borrow_and_update().clone();
                if let Some(outcome) = settled {
                    return outcome.map_err(|err| err.duplicate());
                }
                if rx.changed().await.is_err() {
                    // Leader dropped without settling (caller went away
                    // mid-handshake); report retryable.
                    return Err(Error::Transient(format!(
                        "certificate acquisition for {name} was aborted"
                    )));
                }
            },
            Role::Leader(tx) => {
                let guard = FlightGuard {
                    cache: self.as_ref(),
                    name,
                };
                let result = self.run_acquisition(name, deadline).await;
                let outcome: FlightOutcome = match &result {
                    Ok(cached) => Ok(cached.clone()),
                    Err(err) => Err(Arc::new(err.duplicate())),
                };
                drop(guard);
                let _ = tx.send(Some(outcome));
                result
            }
        }
    }

    async fn run_acquisition(
        &self,
        name: &str,
        deadline: Duration,
    ) -> Result<Arc<CachedCert>, Error> {
        // Re-check under the guard: a flight that completed between the
        // caller's miss and the guard acquisition already stored a fresh
        // certificate.
        let now = OffsetDateTime::now_utc();
        if let Some(blob) =
            store::with_deadline(store::API_DEADLINE, self.store.get_cert(name)).await?
        {
            if let Ok(cached) = pem::decode_bundle(&blob) {
                if !cached.within_renewal(now, self.renew_window()) {
                    return Ok(Arc::new(cached));
                }
            }
        }

        let bundle = self.acquirer.acquire(name, deadline).await?;
        let blob = pem::encode_bundle(&bundle.key_pem, &bundle.chain_pem);
        let cached = Arc::new(pem::decode_bundle(&blob)?);
        store::with_deadline(store::API_DEADLINE, self.store.put_cert(name, &blob)).await?;
        info!(%name, not_after = %cached.not_after, "certificate stored");
        Ok(cached)
    }

    fn spawn_background_acquisition(self: &Arc<Self>, name: &str) {
        {
            let inflight = self.inflight.lock().unwrap();
            if inflight.contains_key(name) {
                return;
            }
        }
        let cache = self.clone();
        let name = name.to_string();
        debug!(%name, "starting background certificate acquisition");
        tokio::spawn(async move {
            if let Err(err) = cache.obtain(&name, RENEWAL_DEADLINE).await {
                warn!(%name, error = %err, "background certificate acquisition failed");
            }
        });
    }
}
