//! An in-memory implementation of the [`Store`][super::Store] trait.
//!
//! Makes no effort to persist records between restarts. Used by tests and
//! suitable for ephemeral deployments.

use crate::error::Error;
use crate::store::Store;
use std::collections::HashMap;
use std::net::IpAddr;
use tokio::sync::RwLock;

#[derive(Default, Debug)]
struct State {
    ips: HashMap<String, Vec<IpAddr>>,
    txt: HashMap<String, Vec<String>>,
    certs: HashMap<String, Vec<u8>>,
    account: Option<Vec<u8>>,
}

/// An in-memory store. Plain maps behind a reader/writer lock; readers never
/// observe a partial write.
#[derive(Default, Debug)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn get_ips(&self, name: &str) -> Result<Vec<IpAddr>, Error> {
        Ok(self
            .state
            .read()
            .await
            .ips
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_ips(&self, name: &str, addrs: Vec<IpAddr>) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if addrs.is_empty() {
            state.ips.remove(name);
        } else {
            state.ips.insert(name.to_string(), addrs);
        }
        Ok(())
    }

    async fn delete_ips(&self, name: &str) -> Result<(), Error> {
        self.state.write().await.ips.remove(name);
        Ok(())
    }

    async fn get_txt(&self, name: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .state
            .read()
            .await
            .txt
            .get(name)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_txt(&self, name: &str, values: Vec<String>) -> Result<(), Error> {
        let mut state = self.state.write().await;
        if values.is_empty() {
            state.txt.remove(name);
        } else {
            state.txt.insert(name.to_string(), values);
        }
        Ok(())
    }

    async fn delete_txt(&self, name: &str) -> Result<(), Error> {
        self.state.write().await.txt.remove(name);
        Ok(())
    }

    async fn get_cert(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.state.read().await.certs.get(name).cloned())
    }

    async fn put_cert(&self, name: &str, blob: &[u8]) -> Result<(), Error> {
        self.state
            .write()
            .await
            .certs
            .insert(name.to_string(), blob.to_vec());
        Ok(())
    }

    async fn delete_cert(&self, name: &str) -> Result<(), Error> {
        self.state.write().await.certs.remove(name);
        Ok(())
    }

    async fn get_acme_account(&self) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.state.read().await.account.clone())
    }

    async fn put_acme_account(&self, blob: &[u8]) -> Result<(), Error> {
        self.state.write().await.account = Some(blob.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ips(addrs: &[&str]) -> Vec<IpAddr> {
        addrs.iter().map(|a| a.parse().unwrap()).collect()
    }

    #[tokio::test]
    async fn ip_round_trip_is_set_equal() {
        let store = MemoryStore::new();
        let addrs = ips(&["203.0.113.7", "2001:db8::1"]);
        store.put_ips("host.dyn.example.org", addrs.clone()).await.unwrap();

        let got: HashSet<IpAddr> = store
            .get_ips("host.dyn.example.org")
            .await
            .unwrap()
            .into_iter()
            .collect();
        assert_eq!(got, addrs.into_iter().collect());
    }

    #[tokio::test]
    async fn missing_names_read_empty() {
        let store = MemoryStore::new();
        assert!(store.get_ips("absent.dyn.example.org").await.unwrap().is_empty());
        assert!(store.get_txt("absent.dyn.example.org").await.unwrap().is_empty());
        assert!(store.get_cert("absent.dyn.example.org").await.unwrap().is_none());
        assert!(!store.domain_exists("absent.dyn.example.org").await.unwrap());
    }

    #[tokio::test]
    async fn empty_write_prunes_the_key() {
        let store = MemoryStore::new();
        store
            .put_ips("host.dyn.example.org", ips(&["198.51.100.4"]))
            .await
            .unwrap();
        assert!(store.domain_exists("host.dyn.example.org").await.unwrap());

        store.put_ips("host.dyn.example.org", vec![]).await.unwrap();
        assert!(!store.domain_exists("host.dyn.example.org").await.unwrap());
    }

    #[tokio::test]
    async fn domain_exists_tracks_txt_too() {
        let store = MemoryStore::new();
        store
            .put_txt("host.dyn.example.org", vec!["abc123".to_string()])
            .await
            .unwrap();
        assert!(store.domain_exists("host.dyn.example.org").await.unwrap());

        store.delete_txt("host.dyn.example.org").await.unwrap();
        assert!(!store.domain_exists("host.dyn.example.org").await.unwrap());
    }

    #[tokio::test]
    async fn delete_of_absent_key_is_ok() {
        let store = MemoryStore::new();
        store.delete_ips("absent.dyn.example.org").await.unwrap();
        store.delete_txt("absent.dyn.example.org").await.unwrap();
        store.delete_cert("absent.dyn.example.org").await.unwrap();
    }

    #[tokio::test]
    async fn account_blob_round_trips() {
        let store = MemoryStore::new();
        assert!(store.get_acme_account().await.unwrap().is_none());
        store.put_acme_account(b"{\"key\":1}").await.unwrap();
        assert_eq!(store.get_acme_account().await.unwrap().unwrap(), b"{\"key\":1}");
    }
}
