use crate::channel::{Channel, ChannelBuilder};
use crate::error::RealtimeError;
use crate::message::{ChannelEvent, RealtimeMessage};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, trace, warn};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

/// Connection state of the change-feed socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// RealtimeClient options.
#[derive(Debug, Clone)]
pub struct RealtimeClientOptions {
    /// Interval between heartbeats.
    pub heartbeat_interval: Duration,
    /// How long `subscribe` waits for the socket to come up.
    pub connect_timeout: Duration,
}

impl Default for RealtimeClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Client for the store's change feed.
pub struct RealtimeClient {
    pub(crate) url: String,
    pub(crate) next_ref: Arc<AtomicU32>,
    // topic -> Channel
    pub(crate) channels: Arc<RwLock<HashMap<String, Arc<Channel>>>>,
    // Sender feeding the socket writer task
    pub(crate) socket: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    pub(crate) options: RealtimeClientOptions,
    state: Arc<RwLock<ConnectionState>>,
    state_change: broadcast::Sender<ConnectionState>,
    pub(crate) access_token: Arc<RwLock<Option<String>>>,
}

impl RealtimeClient {
    /// Create a client with default options.
    ///
    /// `url` is the store's base URL; `http(s)` is mapped to `ws(s)`.
    pub fn new(url: &str) -> Self {
        Self::new_with_options(url, RealtimeClientOptions::default())
    }

    pub fn new_with_options(url: &str, options: RealtimeClientOptions) -> Self {
        let (state_change_tx, _) = broadcast::channel(16);
        Self {
            url: url.to_string(),
            next_ref: Arc::new(AtomicU32::new(1)),
            channels: Arc::new(RwLock::new(HashMap::new())),
            socket: Arc::new(RwLock::new(None)),
            options,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            state_change: state_change_tx,
            access_token: Arc::new(RwLock::new(None)),
        }
    }

    /// Set the token passed as `auth` when connecting.
    pub async fn set_auth(&self, token: Option<String>) {
        info!("Setting auth token (is_some: {})", token.is_some());
        *self.access_token.write().await = token;
    }

    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_change.subscribe()
    }

    pub async fn get_connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Start building a subscription for `path`.
    pub fn channel(&self, path: &str) -> ChannelBuilder {
        debug!("Creating channel builder for path: {}", path);
        ChannelBuilder::new(self, path)
    }

    /// Build the socket URL: `{base}/.ws?v=1[&auth=token]`.
    pub(crate) fn socket_url(base: &str, token: Option<&str>) -> Result<Url, RealtimeError> {
        let mut url = Url::parse(base)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            s => {
                return Err(RealtimeError::ConnectionError(format!(
                    "Unsupported URL scheme: {}",
                    s
                )))
            }
        };
        url.set_scheme(scheme).map_err(|_| {
            RealtimeError::ConnectionError(format!("Cannot use scheme {} for {}", scheme, base))
        })?;
        url.host_str()
            .ok_or(RealtimeError::UrlParseError(url::ParseError::EmptyHost))?;

        let mut url = url.join(".ws")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("v", "1");
            if let Some(token) = token {
                query.append_pair("auth", token);
            }
        }
        Ok(url)
    }

    /// Open the socket and spawn the reader/writer tasks.
    ///
    /// Resolves once the socket is connected; the tasks keep running in the
    /// background. Watch [`RealtimeClient::on_state_change`] for disconnects.
    pub fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<(), RealtimeError>> + Send + 'static {
        let url = self.url.clone();
        let socket_arc = self.socket.clone();
        let state_arc = self.state.clone();
        let state_change_tx = self.state_change.clone();
        let channels_arc = self.channels.clone();
        let next_ref = self.next_ref.clone();
        let heartbeat_interval = self.options.heartbeat_interval;
        let token_arc = self.access_token.clone();

        async move {
            let token = token_arc.read().await.clone();
            let ws_url = Self::socket_url(&url, token.as_deref())?;
            info!("Connecting change feed at {}", ws_url.as_str().split('?').next().unwrap_or(""));

            Self::set_connection_state_internal(
                &state_arc,
                &state_change_tx,
                ConnectionState::Connecting,
            )
            .await;

            let ws_stream = match connect_async(ws_url.as_str()).await {
                Ok((stream, response)) => {
                    debug!("WebSocket connection successful. Status: {}", response.status());
                    stream
                }
                Err(e) => {
                    error!("WebSocket connection failed: {}", e);
                    Self::set_connection_state_internal(
                        &state_arc,
                        &state_change_tx,
                        ConnectionState::Disconnected,
                    )
                    .await;
                    return Err(RealtimeError::ConnectionError(format!(
                        "WebSocket connection failed: {}",
                        e
                    )));
                }
            };

            let (mut write, mut read) = ws_stream.split();
            let (socket_tx, mut socket_rx) = mpsc::channel::<Message>(100);
            *socket_arc.write().await = Some(socket_tx);

            Self::set_connection_state_internal(
                &state_arc,
                &state_change_tx,
                ConnectionState::Connected,
            )
            .await;

            // --- Writer ---
            let writer_socket_arc = socket_arc.clone();
            tokio::spawn(async move {
                debug!("Writer task started");
                while let Some(message) = socket_rx.recv().await {
                    trace!("Writer task sending message: {:?}", message);
                    if let Err(e) = write.send(message).await {
                        error!("Writer task: WebSocket send error: {}. Closing connection.", e);
                        *writer_socket_arc.write().await = None;
                        socket_rx.close();
                        break;
                    }
                }
                let _ = write.close().await;
                debug!("Writer task finished");
            });

            // --- Reader + heartbeat ---
            let reader_socket_arc = socket_arc.clone();
            tokio::spawn(async move {
                debug!("Reader task started");
                loop {
                    tokio::select! {
                        biased;

                        msg_result = read.next() => {
                            match msg_result {
                                Some(Ok(Message::Text(text))) => {
                                    Self::route(&channels_arc, &text).await;
                                }
                                Some(Ok(msg)) if msg.is_close() => {
                                    debug!("Reader task received Close frame");
                                    break;
                                }
                                Some(Ok(msg)) => {
                                    trace!("Reader task ignoring non-text message: {:?}", msg);
                                }
                                Some(Err(e)) => {
                                    error!("Reader task: WebSocket read error: {}", e);
                                    break;
                                }
                                None => {
                                    debug!("Reader task: stream closed by remote");
                                    break;
                                }
                            }
                        }

                        _ = sleep(heartbeat_interval) => {
                            // Cloned per beat so a disconnect can drop the last sender.
                            let current_socket_tx = match reader_socket_arc.read().await.as_ref() {
                                Some(tx) => tx.clone(),
                                None => {
                                    debug!("Reader task: socket sender gone, exiting.");
                                    break;
                                }
                            };
                            let heartbeat = json!({
                                "topic": "phoenix",
                                "event": ChannelEvent::Heartbeat,
                                "payload": {},
                                "ref": next_ref.fetch_add(1, Ordering::SeqCst).to_string(),
                            });
                            if let Err(e) = current_socket_tx.send(Message::Text(heartbeat.to_string())).await {
                                error!("Reader task: failed to send heartbeat: {}", e);
                                break;
                            }
                        }
                    }
                }

                *reader_socket_arc.write().await = None;
                for channel in channels_arc.read().await.values() {
                    channel.close().await;
                }
                Self::set_connection_state_internal(
                    &state_arc,
                    &state_change_tx,
                    ConnectionState::Disconnected,
                )
                .await;
                debug!("Reader task finished");
            });

            Ok(())
        }
    }

    async fn route(channels: &RwLock<HashMap<String, Arc<Channel>>>, text: &str) {
        let message = match serde_json::from_str::<RealtimeMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("Failed to parse incoming message: {}. Raw: {}", e, text);
                return;
            }
        };
        let target = channels.read().await.get(&message.topic).cloned();
        match target {
            Some(channel) => channel.handle_message(message).await,
            None if message.topic == "phoenix" => {
                trace!("Socket-level message: {:?}", message.event);
            }
            None => {
                warn!("Message for unknown topic: {}", message.topic);
            }
        }
    }

    async fn set_connection_state_internal(
        state_arc: &RwLock<ConnectionState>,
        state_change_tx: &broadcast::Sender<ConnectionState>,
        state: ConnectionState,
    ) {
        let mut current_state = state_arc.write().await;
        if *current_state != state {
            trace!("Connection state {:?} -> {:?}", *current_state, state);
            *current_state = state;
            let _ = state_change_tx.send(state);
        }
    }

    /// Close the socket. Open subscriptions end.
    pub async fn disconnect(&self) -> Result<(), RealtimeError> {
        info!("disconnect() called");
        if self.socket.write().await.take().is_none() {
            warn!("disconnect(): no active socket, likely already disconnected.");
        }
        for channel in self.channels.read().await.values() {
            channel.close().await;
        }
        Self::set_connection_state_internal(
            &self.state,
            &self.state_change,
            ConnectionState::Disconnected,
        )
        .await;
        Ok(())
    }
}

impl Clone for RealtimeClient {
    fn clone(&self) -> Self {
        Self {
            url: self.url.clone(),
            next_ref: self.next_ref.clone(),
            channels: self.channels.clone(),
            socket: self.socket.clone(),
            options: self.options.clone(),
            state: self.state.clone(),
            state_change: self.state_change.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

impl From<mpsc::error::SendError<Message>> for RealtimeError {
    fn from(err: mpsc::error::SendError<Message>) -> Self {
        RealtimeError::ConnectionError(format!("Failed to send message to socket task: {}", err))
    }
}
