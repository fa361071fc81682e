use crate::client::{ConnectionState, RealtimeClient};
use crate::error::RealtimeError;
use crate::message::{ChangeEvent, ChannelEvent, RealtimeMessage, SubscriptionKind};
use futures_util::Stream;
use log::{debug, error, info, trace, warn};
use serde_json::json;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

/// An active subscription to one path.
///
/// Yields [`ChangeEvent`]s until the connection closes. Dropping it leaves the
/// channel once no other subscription uses it.
pub struct Subscription {
    id: String,
    channel: Arc<Channel>,
    receiver: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.channel.topic
    }
}

impl Stream for Subscription {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let id = self.id.clone();
        let channel = self.channel.clone();
        // No runtime means the process is shutting down and the socket is gone anyway.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = channel.unsubscribe(&id).await {
                    warn!("Error unsubscribing from channel {}: {}", channel.topic, e);
                }
            });
        }
    }
}

/// Per-topic fan-out of decoded change events.
pub(crate) struct Channel {
    topic: String,
    path: String,
    kind: SubscriptionKind,
    subscribers: RwLock<HashMap<String, mpsc::UnboundedSender<ChangeEvent>>>,
    socket: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    next_ref: Arc<AtomicU32>,
}

impl Channel {
    async fn send(&self, event: ChannelEvent, payload: serde_json::Value) -> Result<(), RealtimeError> {
        let socket_guard = self.socket.read().await;
        let socket_tx = socket_guard.as_ref().ok_or_else(|| {
            RealtimeError::ConnectionError("Client socket unavailable".to_string())
        })?;
        let message = json!({
            "topic": self.topic,
            "event": event,
            "payload": payload,
            "ref": self.next_ref.fetch_add(1, Ordering::SeqCst).to_string(),
        });
        socket_tx
            .send(Message::Text(message.to_string()))
            .await
            .map_err(|e| {
                RealtimeError::ConnectionError(format!("Failed to send {} message: {}", event, e))
            })
    }

    async fn join(&self) -> Result<(), RealtimeError> {
        debug!("Joining channel {}", self.topic);
        self.send(
            ChannelEvent::PhoenixJoin,
            json!({ "path": self.path, "kind": self.kind }),
        )
        .await
    }

    async fn unsubscribe(&self, id: &str) -> Result<(), RealtimeError> {
        let remaining = {
            let mut subscribers = self.subscribers.write().await;
            subscribers.remove(id);
            subscribers.len()
        };
        if remaining == 0 {
            debug!("Last subscription {} dropped, leaving {}", id, self.topic);
            // Socket may already be closed; nothing left to leave then.
            if self.socket.read().await.is_some() {
                self.send(ChannelEvent::PhoenixLeave, json!({})).await?;
            }
        }
        Ok(())
    }

    /// Drop every subscriber sender so their streams terminate.
    pub(crate) async fn close(&self) {
        let mut subscribers = self.subscribers.write().await;
        if !subscribers.is_empty() {
            info!("Closing {} subscription(s) on {}", subscribers.len(), self.topic);
        }
        subscribers.clear();
    }

    pub(crate) async fn handle_message(&self, message: RealtimeMessage) {
        trace!("Channel {} handling {}", self.topic, message.event);
        match message.event {
            ChannelEvent::PhoenixReply => {
                debug!("Channel {} reply: {}", self.topic, message.payload);
            }
            ChannelEvent::PhoenixError => {
                error!("Channel {} received phx_error: {}", self.topic, message.payload);
            }
            ChannelEvent::PhoenixClose => {
                info!("Channel {} closed by server", self.topic);
                self.close().await;
            }
            event if self.kind.events().contains(&event) => {
                match ChangeEvent::from_wire(event, message.payload) {
                    Some(Ok(change)) => self.dispatch(change).await,
                    Some(Err(e)) => {
                        warn!("Dropping malformed {} payload on {}: {}", event, self.topic, e)
                    }
                    None => {}
                }
            }
            other => {
                debug!("Unhandled event '{}' on channel '{}'", other, self.topic);
            }
        }
    }

    async fn dispatch(&self, change: ChangeEvent) {
        let mut closed = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, sender) in subscribers.iter() {
                if sender.send(change.clone()).is_err() {
                    closed.push(id.clone());
                }
            }
        }
        if !closed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in closed {
                subscribers.remove(&id);
            }
        }
    }
}

/// Builder for a subscription to one store path.
pub struct ChannelBuilder<'a> {
    client: &'a RealtimeClient,
    path: String,
    kind: SubscriptionKind,
}

impl<'a> ChannelBuilder<'a> {
    pub(crate) fn new(client: &'a RealtimeClient, path: &str) -> Self {
        Self {
            client,
            path: path.trim_matches('/').to_string(),
            kind: SubscriptionKind::Value,
        }
    }

    /// Select whole-value or per-child notifications. Defaults to whole-value.
    pub fn kind(mut self, kind: SubscriptionKind) -> Self {
        self.kind = kind;
        self
    }

    /// Connect if needed, join the channel and return the event stream.
    pub async fn subscribe(self) -> Result<Subscription, RealtimeError> {
        self.ensure_connected().await?;

        let topic = self.kind.topic(&self.path);
        let channel = {
            let mut channels = self.client.channels.write().await;
            channels
                .entry(topic.clone())
                .or_insert_with(|| {
                    Arc::new(Channel {
                        topic: topic.clone(),
                        path: self.path.clone(),
                        kind: self.kind,
                        subscribers: RwLock::new(HashMap::new()),
                        socket: self.client.socket.clone(),
                        next_ref: self.client.next_ref.clone(),
                    })
                })
                .clone()
        };

        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let first = {
            let mut subscribers = channel.subscribers.write().await;
            subscribers.insert(id.clone(), tx);
            subscribers.len() == 1
        };

        if first {
            if let Err(e) = channel.join().await {
                channel.subscribers.write().await.remove(&id);
                return Err(e);
            }
        }

        Ok(Subscription {
            id,
            channel,
            receiver: rx,
        })
    }

    async fn ensure_connected(&self) -> Result<(), RealtimeError> {
        let mut rx = self.client.on_state_change();
        let initial_state = self.client.get_connection_state().await;
        if initial_state == ConnectionState::Connected {
            return Ok(());
        }

        debug!(
            "Client not connected (state: {:?}), connecting before subscribe",
            initial_state
        );
        let connect_future = self.client.connect();
        tokio::spawn(async move {
            if let Err(e) = connect_future.await {
                error!("Background connect task failed: {}", e);
            }
        });

        let wait_result = timeout(self.client.options.connect_timeout, async {
            loop {
                match rx.recv().await {
                    Ok(ConnectionState::Connected) => break Ok(()),
                    Ok(ConnectionState::Connecting) => continue,
                    Ok(other_state) => {
                        break Err(RealtimeError::ConnectionError(format!(
                            "Connection attempt resulted in unexpected state: {:?}",
                            other_state
                        )))
                    }
                    Err(_) => {
                        break Err(RealtimeError::ConnectionError(
                            "State change receiver error while waiting for connection.".to_string(),
                        ))
                    }
                }
            }
        })
        .await;

        match wait_result {
            Ok(result) => result,
            Err(_) => {
                let current_state = self.client.get_connection_state().await;
                Err(RealtimeError::ConnectionError(format!(
                    "Timeout waiting for connection. Current state: {:?}",
                    current_state
                )))
            }
        }
    }
}
