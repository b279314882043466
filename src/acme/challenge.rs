//! Challenge record publication.
//!
//! Installs and retracts `_acme-challenge.<name>` TXT records through the
//! shared store, where the zone responder serves them like any other TXT
//! entry. No waiting happens here; propagation is the order driver's
//! concern.

use crate::error::Error;
use crate::store::{self, DynStore};
use tracing::{debug, warn};

/// Label prepended to a subject name to form its DNS-01 challenge name.
pub const CHALLENGE_LABEL: &str = "_acme-challenge";

/// Writes challenge TXT records into the zone the server hosts.
#[derive(Clone)]
pub struct ChallengeCoordinator {
    store: DynStore,
}

impl ChallengeCoordinator {
    pub fn new(store: DynStore) -> Self {
        ChallengeCoordinator { store }
    }

    /// The store key for a subject's challenge record.
    pub fn challenge_name(name: &str) -> String {
        format!("{CHALLENGE_LABEL}.{name}")
    }

    /// Publish `txt` as the sole TXT value for `_acme-challenge.<name>`.
    ///
    /// Replaces any previous value, so repeated installs of the same value
    /// are no-ops from the caller's perspective. A store failure here fails
    /// the order: a challenge the zone cannot serve will never validate.
    pub async fn install(&self, name: &str, txt: &str) -> Result<(), Error> {
        let record = Self::challenge_name(name);
        debug!(%record, "installing challenge TXT record");
        store::with_deadline(
            store::API_DEADLINE,
            self.store.put_txt(&record, vec![txt.to_string()]),
        )
        .await
    }

    /// Remove the challenge record for `name`.
    ///
    /// Best-effort cleanup: failures are logged, never raised, so retraction
    /// can run on every order exit path without masking the order outcome.
    pub async fn retract(&self, name: &str) {
        let record = Self::challenge_name(name);
        match store::with_deadline(store::API_DEADLINE, self.store.delete_txt(&record)).await {
            Ok(()) => debug!(%record, "retracted challenge TXT record"),
            Err(err) => warn!(%record, error = %err, "failed to retract challenge TXT record"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, Store};
    use std::sync::Arc;

    #[tokio::test]
    async fn install_then_retract_leaves_nothing() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = ChallengeCoordinator::new(store.clone());

        coordinator
            .install("host.dyn.example.org", "abc123")
            .await
            .unwrap();
        assert_eq!(
            store
                .get_txt("_acme-challenge.host.dyn.example.org")
                .await
                .unwrap(),
            vec!["abc123".to_string()]
        );

        coordinator.retract("host.dyn.example.org").await;
        assert!(store
            .get_txt("_acme-challenge.host.dyn.example.org")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn install_replaces_previous_value() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = ChallengeCoordinator::new(store.clone());

        coordinator
            .install("host.dyn.example.org", "first")
            .await
            .unwrap();
        coordinator
            .install("host.dyn.example.org", "second")
            .await
            .unwrap();
        assert_eq!(
            store
                .get_txt("_acme-challenge.host.dyn.example.org")
                .await
                .unwrap(),
            vec!["second".to_string()]
        );
    }

    #[tokio::test]
    async fn retract_of_absent_record_is_quiet() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = ChallengeCoordinator::new(store);
        coordinator.retract("host.dyn.example.org").await;
    }
}
