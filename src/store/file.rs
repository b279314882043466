//! A file-backed implementation of the [`Store`][super::Store] trait.
//!
//! Keeps one file per store key inside a single directory (created mode
//! 0700; files are 0600). IP sets and TXT lists are serialised as JSON;
//! certificate and account blobs are stored verbatim. Every write lands in
//! a temp file in the same directory and is moved over the target with an
//! atomic rename, so readers only ever observe complete values and a crash
//! mid-write leaves the previous value committed.

use crate::error::Error;
use crate::store::{Store, ACME_ACCOUNT_KEY, CERT_PREFIX, IP_PREFIX, TXT_PREFIX};
use std::io::ErrorKind;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

/// A file-backed store rooted at one directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) the store directory.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
        }
        Ok(FileStore { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are prefix + normalised hostname; the hostname syntax check
        // keeps path separators out of names before they reach the store.
        self.dir.join(key)
    }

    async fn read_key(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io(err)),
        }
    }

    async fn write_key(&self, key: &str, data: Vec<u8>) -> Result<(), Error> {
        let dir = self.dir.clone();
        let path = self.path_for(key);
        tokio::task::spawn_blocking(move || -> Result<(), Error> {
            // NamedTempFile is created 0600 in the store directory, so the
            // rename stays on one filesystem.
            let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
            tmp.write_all(&data)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path).map_err(|err| Error::Io(err.error))?;
            Ok(())
        })
        .await
        .map_err(|err| Error::Transient(err.to_string()))?
    }

    async fn delete_key(&self, key: &str) -> Result<(), Error> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(Error::Io(err)),
        }
    }

    async fn read_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, Error> {
        match self.read_key(key).await? {
            None => Ok(None),
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
        }
    }

    async fn write_json<T: serde::Serialize>(&self, key: &str, value: &T) -> Result<(), Error> {
        self.write_key(key, serde_json::to_vec(value)?).await
    }
}

#[async_trait::async_trait]
impl Store for FileStore {
    async fn get_ips(&self, name: &str) -> Result<Vec<IpAddr>, Error> {
        Ok(self
            .read_json(&format!("{IP_PREFIX}{name}"))
            .await?
            .unwrap_or_default())
    }

    async fn put_ips(&self, name: &str, addrs: Vec<IpAddr>) -> Result<(), Error> {
        let key = format!("{IP_PREFIX}{name}");
        if addrs.is_empty() {
            return self.delete_key(&key).await;
        }
        self.write_json(&key, &addrs).await
    }

    async fn delete_ips(&self, name: &str) -> Result<(), Error> {
        self.delete_key(&format!("{IP_PREFIX}{name}")).await
    }

    async fn get_txt(&self, name: &str) -> Result<Vec<String>, Error> {
        Ok(self
            .read_json(&format!("{TXT_PREFIX}{name}"))
            .await?
            .unwrap_or_default())
    }

    async fn put_txt(&self, name: &str, values: Vec<String>) -> Result<(), Error> {
        let key = format!("{TXT_PREFIX}{name}");
        if values.is_empty() {
            return self.delete_key(&key).await;
        }
        self.write_json(&key, &values).await
    }

    async fn delete_txt(&self, name: &str) -> Result<(), Error> {
        self.delete_key(&format!("{TXT_PREFIX}{name}")).await
    }

    async fn get_cert(&self, name: &str) -> Result<Option<Vec<u8>>, Error> {
        self.read_key(&format!("{CERT_PREFIX}{name}")).await
    }

    async fn put_cert(&self, name: &str, blob: &[u8]) -> Result<(), Error> {
        self.write_key(&format!("{CERT_PREFIX}{name}"), blob.to_vec())
            .await
    }

    async fn delete_cert(&self, name: &str) -> Result<(), Error> {
        self.delete_key(&format!("{CERT_PREFIX}{name}")).await
    }

    async fn get_acme_account(&self) -> Result<Option<Vec<u8>>, Error> {
        self.read_key(ACME_ACCOUNT_KEY).await
    }

    async fn put_acme_account(&self, blob: &[u8]) -> Result<(), Error> {
        self.write_key(ACME_ACCOUNT_KEY, blob.to_vec()).await
    }
}
