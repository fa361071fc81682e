//! Remote synchronized document stores

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use catalogo_sync_realtime::{ChangeEvent, ChildSnapshot, RealtimeClient, SubscriptionKind};
use futures_util::Stream;
use log::{debug, info};
use reqwest::Client;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use crate::error::{Error, Result};
use crate::fetch::{document_url, Fetch};

/// Stream of change notifications for one subscribed path.
pub type ChangeStream = Pin<Box<dyn Stream<Item = ChangeEvent> + Send>>;

/// A shared, multi-client, tree-structured document database.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read the whole document at `path`. Absent paths read as `null`.
    async fn get(&self, path: &str) -> Result<Value>;

    /// Replace the whole document at `path`.
    async fn set(&self, path: &str, value: &Value) -> Result<()>;

    /// Subscribe to whole-value or per-child notifications for `path`.
    async fn subscribe(&self, path: &str, kind: SubscriptionKind) -> Result<ChangeStream>;
}

/// REST document store with a WebSocket change feed.
///
/// Documents live at `{base}/{path}.json`; the token, if any, is sent as the
/// `auth` query parameter.
pub struct HttpRemoteStore {
    base_url: String,
    auth_token: Option<String>,
    http_client: Client,
    realtime: RealtimeClient,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, auth_token: Option<&str>) -> Result<Self> {
        Self::new_with_timeout(base_url, auth_token, None)
    }

    pub fn new_with_timeout(
        base_url: &str,
        auth_token: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        url::Url::parse(base_url)?;

        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            base_url: base_url.to_string(),
            auth_token: auth_token.map(str::to_string),
            http_client: builder.build()?,
            realtime: RealtimeClient::new(base_url),
        })
    }

    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn get(&self, path: &str) -> Result<Value> {
        let url = document_url(&self.base_url, path)?;
        Fetch::get(&self.http_client, url)
            .auth(self.auth_token.as_deref())
            .execute::<Value>()
            .await
    }

    async fn set(&self, path: &str, value: &Value) -> Result<()> {
        let url = document_url(&self.base_url, path)?;
        Fetch::put(&self.http_client, url)
            .auth(self.auth_token.as_deref())
            .json(value)?
            .execute::<Value>()
            .await?;
        Ok(())
    }

    async fn subscribe(&self, path: &str, kind: SubscriptionKind) -> Result<ChangeStream> {
        self.realtime.set_auth(self.auth_token.clone()).await;
        let subscription = self.realtime.channel(path).kind(kind).subscribe().await?;
        Ok(Box::pin(subscription))
    }
}

/// Children of a document keyed the way the change feed keys them: element
/// index for arrays, member name for maps. Null children do not exist.
pub fn keyed_children(value: &Value) -> Vec<(String, Value)> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_null())
            .map(|(i, v)| (i.to_string(), v.clone()))
            .collect(),
        Value::Object(map) => map
            .iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Child events turning `old` into `new`.
///
/// Children whose value is gone from `new` are removed first, at their old
/// keys from the highest down. Changes and additions follow in key order.
/// Keys that vanished only because later children shifted down come last.
pub fn child_diff(old: &Value, new: &Value) -> Vec<ChangeEvent> {
    let before = keyed_children(old);
    let after = keyed_children(new);
    let before_keys: HashMap<&str, &Value> = before.iter().map(|(k, v)| (k.as_str(), v)).collect();
    let after_keys: HashMap<&str, ()> = after.iter().map(|(k, _)| (k.as_str(), ())).collect();

    let departed = |value: &Value| !after.iter().any(|(_, v)| v == value);
    let removed = |(key, value): &(String, Value)| {
        ChangeEvent::ChildRemoved(ChildSnapshot::new(key.clone(), value.clone()))
    };

    let mut events: Vec<ChangeEvent> = before
        .iter()
        .rev()
        .filter(|(_, v)| departed(v))
        .map(removed)
        .collect();

    for (key, value) in &after {
        match before_keys.get(key.as_str()) {
            Some(previous) if *previous == value => {}
            Some(_) => events.push(ChangeEvent::ChildChanged(ChildSnapshot::new(
                key.clone(),
                value.clone(),
            ))),
            None => events.push(ChangeEvent::ChildAdded(ChildSnapshot::new(
                key.clone(),
                value.clone(),
            ))),
        }
    }

    events.extend(
        before
            .iter()
            .rev()
            .filter(|(k, v)| !after_keys.contains_key(k.as_str()) && !departed(v))
            .map(removed),
    );
    events
}

struct Subscriber {
    path: String,
    kind: SubscriptionKind,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct MemoryInner {
    documents: RwLock<HashMap<String, Value>>,
    subscribers: RwLock<Vec<Subscriber>>,
    offline: AtomicBool,
    writes: AtomicUsize,
}

/// In-process document tree shared by every clone.
///
/// Each clone behaves like another client of the same database: a `set` from
/// any of them notifies all subscribers. Can be switched offline to simulate
/// an unreachable remote.
#[derive(Clone, Default)]
pub struct MemoryRemoteStore {
    inner: Arc<MemoryInner>,
}

fn normalize_path(path: &str) -> String {
    path.trim_matches('/').to_string()
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_online(&self, online: bool) {
        info!("Memory remote store going {}", if online { "online" } else { "offline" });
        self.inner.offline.store(!online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        !self.inner.offline.load(Ordering::SeqCst)
    }

    /// Number of accepted `set` calls across all clones.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Write a document without notifying anyone, even while offline.
    pub async fn seed(&self, path: &str, value: Value) {
        self.inner
            .documents
            .write()
            .await
            .insert(normalize_path(path), value);
    }

    /// Current document at `path`, even while offline.
    pub async fn document(&self, path: &str) -> Value {
        self.inner
            .documents
            .read()
            .await
            .get(&normalize_path(path))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Deliver `event` to every subscriber of `path` that asked for its kind,
    /// as a replaying or reconnecting feed would.
    pub async fn push(&self, path: &str, event: ChangeEvent) {
        let path = normalize_path(path);
        self.deliver(&path, |kind| {
            if kind.events().contains(&event.event()) {
                vec![event.clone()]
            } else {
                Vec::new()
            }
        })
        .await;
    }

    /// End every open subscription stream.
    pub async fn drop_subscribers(&self) {
        self.inner.subscribers.write().await.clear();
    }

    fn ensure_online(&self) -> Result<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(Error::unavailable("remote store is offline"))
        }
    }

    async fn deliver<F>(&self, path: &str, events_for: F)
    where
        F: Fn(SubscriptionKind) -> Vec<ChangeEvent>,
    {
        let mut subscribers = self.inner.subscribers.write().await;
        subscribers.retain(|subscriber| {
            if subscriber.path != path {
                return !subscriber.sender.is_closed();
            }
            events_for(subscriber.kind)
                .into_iter()
                .all(|event| subscriber.sender.send(event).is_ok())
        });
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn get(&self, path: &str) -> Result<Value> {
        self.ensure_online()?;
        Ok(self.document(path).await)
    }

    async fn set(&self, path: &str, value: &Value) -> Result<()> {
        self.ensure_online()?;
        let path = normalize_path(path);
        let old = self
            .inner
            .documents
            .write()
            .await
            .insert(path.clone(), value.clone())
            .unwrap_or(Value::Null);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);

        let children = child_diff(&old, value);
        debug!("Memory remote set '{}': {} child event(s)", path, children.len());
        self.deliver(&path, |kind| match kind {
            SubscriptionKind::Value => vec![ChangeEvent::Value(value.clone())],
            SubscriptionKind::Children => children.clone(),
        })
        .await;
        Ok(())
    }

    async fn subscribe(&self, path: &str, kind: SubscriptionKind) -> Result<ChangeStream> {
        self.ensure_online()?;
        let path = normalize_path(path);
        let (sender, mut receiver) = mpsc::unbounded_channel();

        // Like the real feed, a new subscriber first sees the current state.
        let current = self.document(&path).await;
        match kind {
            SubscriptionKind::Value => {
                let _ = sender.send(ChangeEvent::Value(current));
            }
            SubscriptionKind::Children => {
                for (key, value) in keyed_children(&current) {
                    let _ = sender.send(ChangeEvent::ChildAdded(ChildSnapshot::new(key, value)));
                }
            }
        }

        self.inner.subscribers.write().await.push(Subscriber {
            path,
            kind,
            sender,
        });

        let stream = futures_util::stream::poll_fn(move |cx| receiver.poll_recv(cx));
        Ok(Box::pin(stream))
    }
}
