//! Backing stores and the remote-then-local persistence policy

pub mod local;
pub mod remote;

pub use local::{FileLocalStore, LocalStore, MemoryLocalStore};
pub use remote::{ChangeStream, HttpRemoteStore, MemoryRemoteStore, RemoteStore};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde_json::Value;
use tokio::time::{sleep, timeout};

use crate::config::SyncOptions;
use crate::error::{Error, Result};

/// How a collection is kept in sync with the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Every write pushes the whole array; every remote change replaces it.
    WholeReplace,
    /// One-shot initial read, then per-child add/remove/change deltas.
    Incremental,
}

/// The independently synchronized collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionName {
    Products,
    Especiales,
    Credits,
}

impl CollectionName {
    /// Remote path, also used as the local fallback key.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Products => "products",
            Self::Especiales => "especiales",
            Self::Credits => "credits",
        }
    }

    pub fn strategy(&self) -> Strategy {
        match self {
            Self::Especiales => Strategy::Incremental,
            Self::Products | Self::Credits => Strategy::WholeReplace,
        }
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Where a save ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Durability {
    /// Confirmed by the remote store (and mirrored locally when possible).
    Remote,
    /// Remote missing or failed; the local fallback holds the data.
    LocalOnly,
    /// Neither store accepted the data; it lives in memory only.
    Volatile,
}

/// Remote store plus local fallback, with the read and write policy
/// implemented once for every collection.
pub struct Storage {
    remote: Option<Arc<dyn RemoteStore>>,
    local: Arc<dyn LocalStore>,
    retry_delay: Duration,
    load_timeout: Duration,
}

impl Storage {
    pub fn new(remote: Option<Arc<dyn RemoteStore>>, local: Arc<dyn LocalStore>) -> Self {
        let defaults = SyncOptions::default();
        Self {
            remote,
            local,
            retry_delay: defaults.load_retry_delay,
            load_timeout: defaults.initial_load_timeout,
        }
    }

    /// Build the stores described by `options`: an HTTP remote when a URL is
    /// configured and a file-backed local fallback.
    pub fn from_options(options: &SyncOptions) -> Result<Self> {
        let remote: Option<Arc<dyn RemoteStore>> = match &options.remote_url {
            Some(url) => Some(Arc::new(HttpRemoteStore::new_with_timeout(
                url,
                options.auth_token.as_deref(),
                options.request_timeout,
            )?)),
            None => None,
        };
        let local = Arc::new(FileLocalStore::new(
            options.local_dir.clone(),
            options.local_quota,
        ));
        Ok(Self::new(remote, local)
            .with_retry_delay(options.load_retry_delay)
            .with_load_timeout(options.initial_load_timeout))
    }

    pub fn with_retry_delay(mut self, value: Duration) -> Self {
        self.retry_delay = value;
        self
    }

    pub fn with_load_timeout(mut self, value: Duration) -> Self {
        self.load_timeout = value;
        self
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote.as_ref()
    }

    /// Persist `value`: remote first, then the local mirror. Never fails.
    pub async fn save(&self, collection: CollectionName, value: &Value) -> Durability {
        if let Some(remote) = &self.remote {
            match remote.set(collection.path(), value).await {
                Ok(()) => {
                    if !self.mirror_local(collection, value) {
                        debug!("Saved {} remotely without a local mirror", collection);
                    }
                    return Durability::Remote;
                }
                Err(e) => {
                    warn!(
                        "Remote save of {} failed, using local fallback: {}",
                        collection, e
                    );
                }
            }
        }

        if self.mirror_local(collection, value) {
            Durability::LocalOnly
        } else {
            warn!("{} could not be persisted anywhere; kept in memory only", collection);
            Durability::Volatile
        }
    }

    /// One-shot remote read with a single retry after the configured delay.
    pub async fn fetch_remote(&self, collection: CollectionName) -> Result<Value> {
        let remote = self
            .remote
            .as_ref()
            .ok_or_else(|| Error::unavailable("no remote store configured"))?;

        match self.get_once(remote.as_ref(), collection).await {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(
                    "Loading {} from remote failed, retrying in {:?}: {}",
                    collection, self.retry_delay, e
                );
                sleep(self.retry_delay).await;
                self.get_once(remote.as_ref(), collection).await
            }
        }
    }

    async fn get_once(&self, remote: &dyn RemoteStore, collection: CollectionName) -> Result<Value> {
        timeout(self.load_timeout, remote.get(collection.path()))
            .await
            .map_err(|_| {
                Error::unavailable(format!(
                    "remote read of {} timed out after {:?}",
                    collection, self.load_timeout
                ))
            })?
    }

    /// Read the local copy. Absent, unreadable and corrupt keys read as
    /// `None`; a corrupt key is cleared.
    pub fn read_local(&self, collection: CollectionName) -> Option<Value> {
        if !self.local.is_available() {
            debug!("Local store unavailable, nothing to read for {}", collection);
            return None;
        }
        let raw = match self.local.get_item(collection.path()) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Reading local {} failed: {}", collection, e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Local {} is corrupt, clearing it: {}", collection, e);
                if let Err(e) = self.local.remove_item(collection.path()) {
                    warn!("Clearing local {} failed: {}", collection, e);
                }
                None
            }
        }
    }

    /// Overwrite the local copy. Returns whether it was written.
    pub fn mirror_local(&self, collection: CollectionName, value: &Value) -> bool {
        if !self.local.is_available() {
            return false;
        }
        let serialized = value.to_string();
        match self.local.set_item(collection.path(), &serialized) {
            Ok(()) => true,
            Err(e) => {
                warn!("Writing local {} failed: {}", collection, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn storage(remote: Option<MemoryRemoteStore>, local: Arc<MemoryLocalStore>) -> Storage {
        let remote = remote.map(|r| Arc::new(r) as Arc<dyn RemoteStore>);
        Storage::new(remote, local).with_retry_delay(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_save_remote_mirrors_local() {
        let remote = MemoryRemoteStore::new();
        let local = Arc::new(MemoryLocalStore::new());
        let storage = storage(Some(remote.clone()), local.clone());

        let value = json!([{ "id": "a" }]);
        assert_eq!(
            storage.save(CollectionName::Products, &value).await,
            Durability::Remote
        );
        assert_eq!(remote.document("products").await, value);
        assert_eq!(storage.read_local(CollectionName::Products), Some(value));
    }

    #[tokio::test]
    async fn test_save_falls_back_when_remote_fails() {
        let remote = MemoryRemoteStore::new();
        remote.set_online(false);
        let local = Arc::new(MemoryLocalStore::new());
        let storage = storage(Some(remote), local);

        let value = json!([{ "id": "b" }]);
        assert_eq!(
            storage.save(CollectionName::Credits, &value).await,
            Durability::LocalOnly
        );
        assert_eq!(storage.read_local(CollectionName::Credits), Some(value));
    }

    #[tokio::test]
    async fn test_save_without_any_store_is_volatile() {
        let storage = storage(None, Arc::new(MemoryLocalStore::disabled()));
        assert_eq!(
            storage.save(CollectionName::Especiales, &json!([])).await,
            Durability::Volatile
        );
    }

    #[tokio::test]
    async fn test_save_over_quota_is_volatile() {
        let storage = storage(None, Arc::new(MemoryLocalStore::with_quota(4)));
        let value = json!([{ "id": "too-big" }]);
        assert_eq!(
            storage.save(CollectionName::Products, &value).await,
            Durability::Volatile
        );
    }

    #[test]
    fn test_corrupt_local_key_is_cleared() {
        let local = Arc::new(MemoryLocalStore::new());
        local.set_item("products", "{not json").unwrap();
        let storage = storage(None, local.clone());

        assert_eq!(storage.read_local(CollectionName::Products), None);
        assert_eq!(local.get_item("products").unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetch_remote_without_remote_is_unavailable() {
        let storage = storage(None, Arc::new(MemoryLocalStore::new()));
        assert!(matches!(
            storage.fetch_remote(CollectionName::Products).await,
            Err(Error::StoreUnavailable(_))
        ));
    }

    #[test]
    fn test_collection_strategies() {
        assert_eq!(CollectionName::Products.strategy(), Strategy::WholeReplace);
        assert_eq!(CollectionName::Credits.strategy(), Strategy::WholeReplace);
        assert_eq!(CollectionName::Especiales.strategy(), Strategy::Incremental);
        assert_eq!(CollectionName::Especiales.to_string(), "especiales");
    }
}
