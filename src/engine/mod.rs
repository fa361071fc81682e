//! Collection sync engine
//!
//! One [`SyncEngine`] owns one collection's in-memory array. It loads the
//! array remote-first with a local fallback, persists every mutation through
//! [`Storage`], and merges remote change notifications back into the array.

pub mod reconcile;

pub use reconcile::{Applied, Reconciler};

use std::sync::Arc;

use catalogo_sync_realtime::SubscriptionKind;
use futures_util::StreamExt;
use log::{debug, error, info, trace, warn};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::{Error, Result};
use crate::store::{ChangeStream, CollectionName, Durability, Storage, Strategy};

/// A record that can live in a synchronized collection.
pub trait Record: Clone + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable identifier, `None` when unset.
    fn identity(&self) -> Option<String>;

    /// (name, scan code) pair used to spot duplicates among records without
    /// an identifier.
    fn attributes(&self) -> Option<(String, String)> {
        None
    }
}

/// State derived from a collection, rebuilt in full whenever it changes.
pub trait Projection<T>: Send + Sync {
    fn rebuild(&self, items: &[T]);
}

/// Where `load` found the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadSource {
    Remote,
    Local,
    /// Nothing stored anywhere; the collection starts empty.
    Empty,
}

/// Notification published after the collection changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionEvent {
    Loaded(LoadSource),
    Saved(Durability),
    /// A change from another client was merged in.
    RemoteApplied,
}

struct State<T> {
    items: Vec<T>,
    gate: Reconciler,
}

struct Shared<T: Record> {
    collection: CollectionName,
    storage: Arc<Storage>,
    state: RwLock<State<T>>,
    /// Held from the moment a new array is staged until its save returns.
    save_lock: Mutex<()>,
    events: broadcast::Sender<CollectionEvent>,
    projection: Option<Arc<dyn Projection<T>>>,
}

impl<T: Record> Shared<T> {
    fn encode(&self, items: &[T]) -> Option<Value> {
        match serde_json::to_value(items) {
            Ok(value) => Some(value),
            Err(e) => {
                error!("Cannot serialize {}: {}", self.collection, e);
                None
            }
        }
    }

    fn rebuild(&self, items: &[T]) {
        if let Some(projection) = &self.projection {
            projection.rebuild(items);
        }
    }

    /// Rebuild derived state and encode the array for saving. Whole-replace
    /// collections also remember the value so its echo is not applied.
    fn stage(&self, state: &mut State<T>) -> Option<Value> {
        self.rebuild(&state.items);
        let value = self.encode(&state.items)?;
        if self.collection.strategy() == Strategy::WholeReplace && self.storage.has_remote() {
            state.gate.expect_echo(value.clone());
        }
        Some(value)
    }

    /// Save an already staged value. Callers hold `save_lock`.
    async fn persist(&self, encoded: Option<Value>) -> Durability {
        let durability = match encoded {
            Some(value) => {
                let durability = self.storage.save(self.collection, &value).await;
                if durability != Durability::Remote {
                    self.state.write().await.gate.forget_echo(&value);
                }
                durability
            }
            None => Durability::Volatile,
        };
        debug!("Saved {}: {:?}", self.collection, durability);
        self.notify(CollectionEvent::Saved(durability));
        durability
    }

    fn notify(&self, event: CollectionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    async fn after_remote_change(&self) {
        let encoded = {
            let state = self.state.read().await;
            self.rebuild(&state.items);
            self.encode(&state.items)
        };
        if let Some(value) = encoded {
            self.storage.mirror_local(self.collection, &value);
        }
        self.notify(CollectionEvent::RemoteApplied);
    }
}

async fn listen<T: Record>(shared: Arc<Shared<T>>, mut stream: ChangeStream) {
    debug!("Listening for {} changes", shared.collection);
    while let Some(event) = stream.next().await {
        let applied = {
            let mut guard = shared.state.write().await;
            let state = &mut *guard;
            state.gate.handle(&mut state.items, event)
        };
        trace!("{}: {:?}", shared.collection, applied);
        if applied.is_mutation() {
            shared.after_remote_change().await;
        }
    }
    debug!("Change stream for {} ended", shared.collection);
}

/// Single owner of one collection's in-memory array.
pub struct SyncEngine<T: Record> {
    shared: Arc<Shared<T>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Record> SyncEngine<T> {
    pub fn new(collection: CollectionName, storage: Arc<Storage>) -> Self {
        Self::new_with_projection(collection, storage, None)
    }

    pub fn new_with_projection(
        collection: CollectionName,
        storage: Arc<Storage>,
        projection: Option<Arc<dyn Projection<T>>>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        let mut gate = Reconciler::new();
        let mut items: Vec<T> = Vec::new();
        gate.open(&mut items);
        Self {
            shared: Arc::new(Shared {
                collection,
                storage,
                state: RwLock::new(State { items, gate }),
                save_lock: Mutex::new(()),
                events,
                projection,
            }),
            listener: Mutex::new(None),
        }
    }

    pub fn collection(&self) -> CollectionName {
        self.shared.collection
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.shared.storage
    }

    /// Subscribe to change notifications, e.g. to re-render.
    pub fn changes(&self) -> broadcast::Receiver<CollectionEvent> {
        self.shared.events.subscribe()
    }

    /// Snapshot of the current array.
    pub async fn items(&self) -> Vec<T> {
        self.shared.state.read().await.items.clone()
    }

    pub async fn len(&self) -> usize {
        self.shared.state.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn find<P>(&self, predicate: P) -> Option<T>
    where
        P: Fn(&T) -> bool,
    {
        self.shared
            .state
            .read()
            .await
            .items
            .iter()
            .find(|item| predicate(item))
            .cloned()
    }

    /// Run `f` against the current array without copying it.
    pub async fn read<R, F>(&self, f: F) -> R
    where
        F: FnOnce(&[T]) -> R,
    {
        f(&self.shared.state.read().await.items)
    }

    /// Load the collection, remote first.
    ///
    /// Whole-replace collections keep a value subscription open; incremental
    /// ones do a one-shot read and then follow child events. Any remote
    /// failure falls back to the local copy, and a missing or corrupt local
    /// copy yields an empty collection.
    pub async fn load(&self) -> LoadSource {
        let collection = self.shared.collection;
        self.stop_listener().await;
        self.shared.state.write().await.gate.close();

        if self.shared.storage.has_remote() {
            match self.load_remote().await {
                Ok(()) => {
                    info!("Loaded {} from remote store", collection);
                    self.shared.notify(CollectionEvent::Loaded(LoadSource::Remote));
                    return LoadSource::Remote;
                }
                Err(e) => {
                    warn!("Remote load of {} failed, using local copy: {}", collection, e);
                    self.stop_listener().await;
                }
            }
        }

        let (items, source) = match self.shared.storage.read_local(collection) {
            Some(value) => (reconcile::decode_collection(value), LoadSource::Local),
            None => (Vec::new(), LoadSource::Empty),
        };
        {
            let mut guard = self.shared.state.write().await;
            let state = &mut *guard;
            state.items = items;
            state.gate.open(&mut state.items);
            self.shared.rebuild(&state.items);
            info!(
                "Loaded {} {} record(s) ({:?})",
                state.items.len(),
                collection,
                source
            );
        }
        self.shared.notify(CollectionEvent::Loaded(source));
        source
    }

    async fn load_remote(&self) -> Result<()> {
        let shared = &self.shared;
        let collection = shared.collection;
        let remote = shared
            .storage
            .remote()
            .ok_or_else(|| Error::unavailable("no remote store configured"))?
            .clone();

        let kind = match collection.strategy() {
            Strategy::WholeReplace => SubscriptionKind::Value,
            Strategy::Incremental => SubscriptionKind::Children,
        };
        match remote.subscribe(collection.path(), kind).await {
            Ok(stream) => {
                let handle = tokio::spawn(listen(shared.clone(), stream));
                *self.listener.lock().await = Some(handle);
            }
            Err(e) => warn!("Live updates for {} unavailable: {}", collection, e),
        }

        let value = shared.storage.fetch_remote(collection).await?;
        let items = reconcile::decode_collection(value);
        let encoded = {
            let mut guard = shared.state.write().await;
            let state = &mut *guard;
            state.items = items;
            let replayed = state.gate.open(&mut state.items);
            if !replayed.is_empty() {
                debug!(
                    "Replayed {} notification(s) for {} after initial read",
                    replayed.len(),
                    collection
                );
            }
            shared.rebuild(&state.items);
            shared.encode(&state.items)
        };
        if let Some(value) = encoded {
            shared.storage.mirror_local(collection, &value);
        }
        Ok(())
    }

    /// Persist the current array: remote first, local fallback. Never fails.
    pub async fn save(&self) -> Durability {
        let _saving = self.shared.save_lock.lock().await;
        let encoded = {
            let mut state = self.shared.state.write().await;
            self.shared.stage(&mut state)
        };
        self.shared.persist(encoded).await
    }

    /// Apply `f` to a copy of the array and persist the result.
    ///
    /// The live array is only replaced when `f` succeeds, so a rejected
    /// mutation leaves the collection and both stores untouched. The value
    /// saved is the one `f` produced, encoded before the lock is released.
    pub async fn mutate<R, F>(&self, f: F) -> Result<(R, Durability)>
    where
        F: FnOnce(&mut Vec<T>) -> Result<R>,
    {
        let _saving = self.shared.save_lock.lock().await;
        let (result, encoded) = {
            let mut state = self.shared.state.write().await;
            let mut draft = state.items.clone();
            let result = f(&mut draft)?;
            state.items = draft;
            (result, self.shared.stage(&mut state))
        };
        Ok((result, self.shared.persist(encoded).await))
    }

    /// Replace the whole array and persist it.
    pub async fn replace_all(&self, items: Vec<T>) -> Durability {
        let _saving = self.shared.save_lock.lock().await;
        let encoded = {
            let mut state = self.shared.state.write().await;
            state.items = items;
            self.shared.stage(&mut state)
        };
        self.shared.persist(encoded).await
    }

    async fn stop_listener(&self) {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
    }

    /// Stop following remote changes.
    pub async fn shutdown(&self) {
        self.stop_listener().await;
        debug!("{} engine shut down", self.shared.collection);
    }
}

impl<T: Record> Drop for SyncEngine<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.get_mut().take() {
            handle.abort();
        }
    }
}
