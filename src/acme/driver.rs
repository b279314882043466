//! ACME v2 order driver.
//!
//! Drives a single-identifier order to completion with the DNS-01 challenge
//! type: publish the challenge TXT record through the coordinator, confirm
//! the zone answers it, signal readiness, poll, finalize with a fresh leaf
//! key, download the chain. The challenge record is retracted on every exit
//! path, successful or not.

use crate::acme::{ChallengeCoordinator, PropagationProbe};
use crate::config::SharedConfig;
use crate::error::Error;
use crate::store::{self, DynStore};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

/// First poll interval after readiness is signalled.
const POLL_INITIAL: Duration = Duration::from_secs(1);
/// Poll interval ceiling.
const POLL_CAP: Duration = Duration::from_secs(10);
/// Transport-error backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Outcome of a successful order: the leaf private key and the PEM chain,
/// leaf first.
#[derive(Debug, Clone)]
pub struct CertBundle {
    pub key_pem: String,
    pub chain_pem: String,
}

/// Seam between the certificate cache and the order machinery, so the
/// cache's single-flight behavior is testable against a stub.
#[async_trait::async_trait]
pub trait Acquire: Send + Sync {
    /// Obtain a fresh certificate for `name` within `deadline`.
    async fn acquire(&self, name: &str, deadline: Duration) -> Result<CertBundle, Error>;
}

/// Runs ACME orders against the configured directory, satisfying DNS-01
/// challenges through the zone this process hosts.
pub struct OrderDriver {
    config: SharedConfig,
    store: DynStore,
    coordinator: ChallengeCoordinator,
    probe: PropagationProbe,
    // Account registration happens once and is shared by all orders; the
    // nonce pool lives inside the ACME client and refills on badNonce.
    account: Mutex<Option<Arc<Account>>>,
}

impl OrderDriver {
    pub fn new(
        config: SharedConfig,
        store: DynStore,
        coordinator: ChallengeCoordinator,
        probe: PropagationProbe,
    ) -> Self {
        OrderDriver {
            config,
            store,
            coordinator,
            probe,
            account: Mutex::new(None),
        }
    }

    /// The shared ACME account, created lazily on first use.
    ///
    /// Credentials are persisted in the store under a reserved key so a
    /// restarted process re-uses its registration instead of minting a new
    /// account per boot.
    async fn account(&self) -> Result<Arc<Account>, Error> {
        let mut guard = self.account.lock().await;
        if let Some(account) = guard.as_ref() {
            return Ok(account.clone());
        }

        if let Some(blob) =
            store::with_deadline(store::API_DEADLINE, self.store.get_acme_account()).await?
        {
            debug!("loading ACME account from store");
            let credentials: AccountCredentials = serde_json::from_slice(&blob)?;
            let account = Account::builder()
                .map_err(acme_error)?
                .from_credentials(credentials)
                .await
                .map_err(acme_error)?;
            let account = Arc::new(account);
            *guard = Some(account.clone());
            return Ok(account);
        }

        info!(
            directory = %self.config.acme.directory_url,
            contact = %self.config.contact.email,
            "registering new ACME account"
        );
        let (account, credentials) = Account::builder()
            .map_err(acme_error)?
            .create(
                &NewAccount {
                    contact: &[&format!("mailto:{}", self.config.contact.email)],
                    terms_of_service_agreed: true,
                    only_return_existing: false,
                },
                self.config.acme.directory_url.clone(),
                None,
            )
            .await
            .map_err(acme_error)?;

        let blob = serde_json::to_vec(&credentials)?;
        store::with_deadline(store::API_DEADLINE, self.store.put_acme_account(&blob)).await?;

        let account = Arc::new(account);
        *guard = Some(account.clone());
        Ok(account)
    }

    async fn run_order(&self, name: &str) -> Result<CertBundle, Error> {
        let account = self.account().await?;
        let identifier = Identifier::Dns(name.to_string());
        let mut order = account
            .new_order(&NewOrder::new(&[identifier]))
            .await
            .map_err(acme_error)?;

        {
            let mut authorizations = order.authorizations();
            let mut authz = match authorizations.next().await {
                Some(Ok(authz)) => authz,
                Some(Err(err)) => return Err(acme_error(err)),
                None => {
                    return Err(Error::AcmeFailed(format!(
                        "order for {name} carries no authorization"
                    )))
                }
            };

            if authz.status != AuthorizationStatus::Valid {
                let mut challenge = authz.challenge(ChallengeType::Dns01).ok_or_else(|| {
                    Error::AcmeFailed(format!("no DNS-01 challenge offered for {name}"))
                })?;
                let key_authorization = challenge.key_authorization();
                let txt_value = dns01_txt_value(key_authorization.as_str());

                self.coordinator.install(name, &txt_value).await?;
                self.probe.wait_for_txt(name, &txt_value).await?;
                challenge.set_ready().await.map_err(acme_error)?;
            } else {
                debug!(%name, "authorization already valid, skipping challenge");
            }
        }

        let status = self
            .poll_order(&mut order, |status| {
                matches!(
                    status,
                    OrderStatus::Ready | OrderStatus::Valid | OrderStatus::Invalid
                )
            })
            .await?;
        if status == OrderStatus::Invalid {
            return Err(Error::AcmeFailed(format!(
                "challenge validation failed for {name}"
            )));
        }
        if status == OrderStatus::Valid {
            // A certificate we hold no key for; RFC 8555 orders only reach
            // valid after finalization.
            return Err(Error::AcmeFailed(format!(
                "order for {name} reported valid before finalization"
            )));
        }

        let cert_key = rcgen::KeyPair::generate()
            .map_err(|err| Error::AcmeFailed(format!("leaf key generation failed: {err}")))?;
        let params = rcgen::CertificateParams::new(vec![name.to_string()])
            .map_err(|err| Error::AcmeFailed(format!("CSR parameters invalid: {err}")))?;
        let csr = params
            .serialize_request(&cert_key)
            .map_err(|err| Error::AcmeFailed(format!("CSR serialisation failed: {err}")))?
            .der()
            .to_vec();
        order.finalize_csr(&csr).await.map_err(acme_error)?;

        let status = self
            .poll_order(&mut order, |status| {
                matches!(status, OrderStatus::Valid | OrderStatus::Invalid)
            })
            .await?;
        if status == OrderStatus::Invalid {
            return Err(Error::AcmeFailed(format!(
                "order for {name} became invalid after finalize"
            )));
        }

        let chain_pem = order
            .certificate()
            .await
            .map_err(acme_error)?
            .ok_or_else(|| Error::AcmeFailed("no certificate in response".to_string()))?;

        Ok(CertBundle {
            key_pem: cert_key.serialize_pem(),
            chain_pem,
        })
    }

    /// Poll the order until `done` matches its status.
    ///
    /// The interval starts at one second and doubles to a ten second cap;
    /// transport failures back off exponentially with jitter instead.
    /// Terminal ACME problems surface immediately; the overall deadline is
    /// enforced by the caller's timeout.
    async fn poll_order(
        &self,
        order: &mut Order,
        done: impl Fn(OrderStatus) -> bool,
    ) -> Result<OrderStatus, Error> {
        let mut interval = POLL_INITIAL;
        let mut failures: u32 = 0;
        loop {
            match order.refresh().await {
                Ok(state) => {
                    if done(state.status) {
                        return Ok(state.status);
                    }
                    trace!(status = ?state.status, "order not settled yet");
                    failures = 0;
                    tokio::time::sleep(interval).await;
                    interval = (interval * 2).min(POLL_CAP);
                }
                Err(instant_acme::Error::Api(problem)) => {
                    return Err(Error::AcmeFailed(problem.to_string()));
                }
                Err(err) => {
                    warn!(error = %err, "order refresh failed, backing off");
                    tokio::time::sleep(backoff_delay(failures)).await;
                    failures = failures.saturating_add(1);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Acquire for OrderDriver {
    async fn acquire(&self, name: &str, deadline: Duration) -> Result<CertBundle, Error> {
        info!(%name, "starting certificate order");
        let result = match tokio::time::timeout(deadline, self.run_order(name)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        };

        // Cleanup runs on every exit path so no challenge record outlives
        // its order.
        self.coordinator.retract(name).await;

        match &result {
            Ok(_) => info!(%name, "certificate order complete"),
            Err(err) => warn!(%name, error = %err, "certificate order failed"),
        }
        result
    }
}

/// DNS-01 TXT value: base64url-encoded SHA-256 of the key authorization.
fn dns01_txt_value(key_authorization: &str) -> String {
    let digest = Sha256::digest(key_authorization.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = (Duration::from_secs(1) * 2u32.saturating_pow(attempt)).min(BACKOFF_CAP);
    // +/-20% jitter keeps simultaneous orders from polling in lockstep.
    exp.mul_f64(rand::thread_rng().gen_range(0.8..=1.2))
}

fn acme_error(err: instant_acme::Error) -> Error {
    match err {
        // Problem documents are the server's word that the request itself is
        // bad; retrying them cannot help.
        instant_acme::Error::Api(problem) => Error::AcmeFailed(problem.to_string()),
        other => Error::Transient(other.to_string()),
    }
}
