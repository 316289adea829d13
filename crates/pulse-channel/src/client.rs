//! WebSocket channel client.

use crate::error::{ChannelError, ChannelResult};
use crate::messages::{ChannelMessage, ChannelMessageType};
use crate::registry::{SubscriptionHandle, SubscriptionRegistry};
use futures_util::future::BoxFuture;
use futures_util::stream::{SplitStream, StreamExt};
use futures_util::SinkExt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tokio::time::{interval, timeout, Duration};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsRead = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Channel client configuration.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Channel server URL (e.g., wss://channel.pulse.social).
    pub url: String,
    /// Heartbeat interval in seconds.
    pub heartbeat_interval_secs: u64,
    /// Timeout for a single connect + handshake attempt, in seconds.
    pub connect_timeout_secs: u64,
    /// Base reconnect delay in seconds.
    pub reconnect_base_delay_secs: u64,
    /// Maximum reconnect delay in seconds.
    pub reconnect_max_delay_secs: u64,
    /// Maximum reconnect attempts.
    pub max_reconnect_attempts: u32,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: "wss://channel.pulse.social".to_string(),
            heartbeat_interval_secs: 30,
            connect_timeout_secs: 10,
            reconnect_base_delay_secs: 2,
            reconnect_max_delay_secs: 30,
            max_reconnect_attempts: 10,
        }
    }
}

/// Authentication material presented during the handshake. Absent token
/// means the backend's ambient session is used.
#[derive(Debug, Clone)]
pub struct Credential {
    pub token: Option<String>,
}

impl Credential {
    pub fn token(token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
        }
    }

    pub fn ambient() -> Self {
        Self { token: None }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Events emitted by the channel client.
#[derive(Debug, Clone)]
pub enum ChannelEvent {
    /// Connected and authenticated.
    Connected,
    /// Connection lost; a reconnect attempt is about to run.
    Reconnecting { attempt: u32 },
    /// Disconnected, with an optional reason.
    Disconnected(Option<String>),
    /// Authentication rejected. No reconnection follows.
    AuthenticationFailed(String),
    /// A message arrived from the backend.
    Message(ChannelMessage),
}

struct Inner {
    config: ChannelConfig,
    state_tx: watch::Sender<ConnectionState>,
    event_tx: broadcast::Sender<ChannelEvent>,
    registry: SubscriptionRegistry,
    sender: Mutex<Option<mpsc::Sender<Message>>>,
    credential: RwLock<Option<Credential>>,
    last_error: std::sync::Mutex<Option<String>>,
    shutdown: AtomicBool,
    /// Bumped on every explicit connect/disconnect. A read loop or reconnect
    /// loop whose captured epoch is stale has been superseded and must stand
    /// down instead of touching shared state.
    epoch: AtomicU64,
    /// Serializes connect attempts so concurrent callers share one handshake.
    connect_lock: Mutex<()>,
}

/// WebSocket channel client with automatic reconnection.
///
/// Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<Inner>,
}

impl ChannelClient {
    /// Create a new channel client with the given configuration.
    pub fn new(config: ChannelConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (event_tx, _) = broadcast::channel(256);

        Self {
            inner: Arc::new(Inner {
                config,
                state_tx,
                event_tx,
                registry: SubscriptionRegistry::new(),
                sender: Mutex::new(None),
                credential: RwLock::new(None),
                last_error: std::sync::Mutex::new(None),
                shutdown: AtomicBool::new(false),
                epoch: AtomicU64::new(0),
                connect_lock: Mutex::new(()),
            }),
        }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ChannelConfig::default())
    }

    /// Subscribe to client lifecycle events.
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Watch connection state transitions.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Check if connected.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// The most recent connection-level error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().expect("lock poisoned").clone()
    }

    /// Register a handler for a message type. Handlers survive reconnects.
    pub fn subscribe<F>(&self, event: ChannelMessageType, handler: F) -> SubscriptionHandle
    where
        F: Fn(&ChannelMessage) + Send + Sync + 'static,
    {
        self.inner.registry.subscribe(event, handler)
    }

    /// Remove a previously registered handler. Safe to call at any time,
    /// including after disconnect.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.inner.registry.unsubscribe(handle);
    }

    /// Connect to the channel server and complete the auth handshake.
    ///
    /// Resolves once the connection is authenticated. Calling while already
    /// connected returns immediately; concurrent callers share the in-flight
    /// attempt instead of opening a second socket.
    pub async fn connect(&self, credential: Option<Credential>) -> ChannelResult<()> {
        *self.inner.credential.write().await = credential;
        self.inner.shutdown.store(false, Ordering::SeqCst);

        let _guard = self.inner.connect_lock.lock().await;
        if self.state() == ConnectionState::Connected {
            debug!("Already connected");
            return Ok(());
        }

        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.state_tx.send_replace(ConnectionState::Connecting);
        match Inner::establish(Arc::clone(&self.inner)).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.inner.record_error(&e);
                self.inner
                    .state_tx
                    .send_replace(ConnectionState::Disconnected);
                if let ChannelError::Authentication(reason) = &e {
                    let _ = self
                        .inner
                        .event_tx
                        .send(ChannelEvent::AuthenticationFailed(reason.clone()));
                }
                Err(e)
            }
        }
    }

    /// Disconnect from the channel. Terminal: cancels any pending
    /// reconnection until the next explicit `connect`.
    pub async fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        if let Some(sender) = self.inner.sender.lock().await.take() {
            drop(sender);
        }

        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnected);
        *self.inner.credential.write().await = None;

        info!("Disconnected from channel");
        let _ = self
            .inner
            .event_tx
            .send(ChannelEvent::Disconnected(Some("client disconnect".to_string())));
    }

    /// Join a conversation room.
    pub async fn join_conversation(&self, conversation_id: &str) -> ChannelResult<()> {
        self.send_message(ChannelMessage::join_conversation(conversation_id))
            .await
    }

    /// Send a chat message into a conversation.
    pub async fn send_chat_message(
        &self,
        conversation_id: &str,
        payload: serde_json::Value,
    ) -> ChannelResult<()> {
        self.send_message(ChannelMessage::send_message(conversation_id, payload))
            .await
    }

    /// Mark messages in a conversation as read.
    pub async fn mark_messages_read(
        &self,
        conversation_id: &str,
        message_ids: &[String],
    ) -> ChannelResult<()> {
        self.send_message(ChannelMessage::mark_messages_read(
            conversation_id,
            message_ids,
        ))
        .await
    }

    /// Signal that the viewer started typing in a conversation.
    pub async fn typing_start(&self, conversation_id: &str) -> ChannelResult<()> {
        self.send_message(ChannelMessage::typing_start(conversation_id))
            .await
    }

    /// Signal that the viewer stopped typing in a conversation.
    pub async fn typing_stop(&self, conversation_id: &str) -> ChannelResult<()> {
        self.send_message(ChannelMessage::typing_stop(conversation_id))
            .await
    }

    /// Ask the backend for the current online-status snapshot.
    pub async fn request_online_statuses(&self) -> ChannelResult<()> {
        self.send_message(ChannelMessage::request_online_statuses())
            .await
    }

    /// Send a message to the channel.
    pub async fn send_message(&self, msg: ChannelMessage) -> ChannelResult<()> {
        let sender = {
            let guard = self.inner.sender.lock().await;
            guard.as_ref().cloned().ok_or(ChannelError::NotConnected)?
        };

        let json = msg.to_json()?;
        sender
            .send(Message::Text(json.into()))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }
}

impl Inner {
    fn record_error(&self, error: &ChannelError) {
        *self.last_error.lock().expect("lock poisoned") = Some(error.to_string());
    }

    /// One full connect attempt: socket, auth handshake, then spawn the
    /// sender, heartbeat, and read-loop tasks. Resolves at Connected.
    ///
    /// Boxed: the read loop's reconnect path re-enters this across a
    /// `tokio::spawn` boundary, so the recursive future must be type-erased.
    fn establish(inner: Arc<Inner>) -> BoxFuture<'static, ChannelResult<()>> {
        Box::pin(Self::establish_inner(inner))
    }

    async fn establish_inner(inner: Arc<Inner>) -> ChannelResult<()> {
        info!(url = %inner.config.url, "Connecting to channel");

        let connect_timeout = Duration::from_secs(inner.config.connect_timeout_secs);
        let (ws_stream, _) = timeout(connect_timeout, connect_async(&inner.config.url))
            .await
            .map_err(|_| ChannelError::Timeout)??;
        let (mut write, mut read) = ws_stream.split();

        // Auth handshake
        let credential = inner.credential.read().await.clone();
        let token = credential.and_then(|c| c.token);
        let auth_msg = ChannelMessage::auth(token.as_deref());
        write.send(Message::Text(auth_msg.to_json()?.into())).await?;
        debug!("Sent AUTH message");

        timeout(connect_timeout, Self::await_auth_result(&mut read))
            .await
            .map_err(|_| ChannelError::Timeout)??;
        info!("Authenticated with channel");

        // Sender task
        let (msg_tx, mut msg_rx) = mpsc::channel::<Message>(100);
        *inner.sender.lock().await = Some(msg_tx.clone());
        tokio::spawn(async move {
            while let Some(msg) = msg_rx.recv().await {
                if write.send(msg).await.is_err() {
                    break;
                }
            }
        });

        // Heartbeat task
        let heartbeat_sender = msg_tx.clone();
        let heartbeat_interval = inner.config.heartbeat_interval_secs;
        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(heartbeat_interval));
            interval.tick().await;
            loop {
                interval.tick().await;
                let heartbeat = ChannelMessage::heartbeat();
                if let Ok(json) = heartbeat.to_json() {
                    if heartbeat_sender
                        .send(Message::Text(json.into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        });

        // Read loop. It carries the epoch of the connect/disconnect cycle it
        // belongs to so a superseded loop can stand down on exit.
        let epoch = inner.epoch.load(Ordering::SeqCst);
        let loop_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            Self::read_loop(loop_inner, read, epoch).await;
        });

        inner.state_tx.send_replace(ConnectionState::Connected);
        let _ = inner.event_tx.send(ChannelEvent::Connected);
        Ok(())
    }

    /// Read frames until AUTH_RESULT arrives. A rejection is fatal.
    async fn await_auth_result(read: &mut WsRead) -> ChannelResult<()> {
        while let Some(msg_result) = read.next().await {
            match msg_result? {
                Message::Text(text) => {
                    let msg = match ChannelMessage::from_json(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(error = %e, "Failed to parse handshake message");
                            continue;
                        }
                    };
                    if msg.msg_type == ChannelMessageType::AuthResult {
                        return if msg.success == Some(true) {
                            Ok(())
                        } else {
                            let reason = msg
                                .error
                                .unwrap_or_else(|| "authentication rejected".to_string());
                            error!(error = %reason, "Authentication failed");
                            Err(ChannelError::Authentication(reason))
                        };
                    }
                }
                Message::Close(_) => {
                    return Err(ChannelError::Connection(
                        "closed during handshake".to_string(),
                    ));
                }
                _ => {}
            }
        }
        Err(ChannelError::Connection(
            "stream ended during handshake".to_string(),
        ))
    }

    /// Process incoming frames until the connection drops, then hand off to
    /// the reconnect loop unless the client was shut down or a newer
    /// connect/disconnect cycle has taken over.
    async fn read_loop(inner: Arc<Inner>, mut read: WsRead, epoch: u64) {
        while let Some(msg_result) = read.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match ChannelMessage::from_json(&text) {
                    Ok(msg) => Self::handle_message(&inner, msg),
                    Err(e) => {
                        warn!(error = %e, "Failed to parse channel message");
                    }
                },
                Ok(Message::Close(_)) => {
                    info!("Channel connection closed");
                    break;
                }
                Ok(Message::Ping(data)) => {
                    if let Some(sender) = inner.sender.lock().await.as_ref() {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "WebSocket error");
                    inner.record_error(&ChannelError::WebSocket(e));
                    break;
                }
            }
        }

        if inner.shutdown.load(Ordering::SeqCst) || inner.epoch.load(Ordering::SeqCst) != epoch {
            // Shut down, or an explicit connect already owns the sender slot.
            return;
        }

        *inner.sender.lock().await = None;
        let _ = inner.event_tx.send(ChannelEvent::Disconnected(None));
        Self::run_reconnect(inner, epoch).await;
    }

    /// Reconnect with exponential backoff until success, a fatal auth
    /// rejection, the attempt budget running out, or an explicit
    /// connect/disconnect superseding this loop's epoch.
    async fn run_reconnect(inner: Arc<Inner>, epoch: u64) {
        if inner.epoch.load(Ordering::SeqCst) != epoch {
            return;
        }
        inner.state_tx.send_replace(ConnectionState::Reconnecting);

        for attempt in 1..=inner.config.max_reconnect_attempts {
            let delay = reconnect_delay(&inner.config, attempt);
            info!(attempt, delay_secs = delay.as_secs(), "Scheduling reconnect");
            let _ = inner.event_tx.send(ChannelEvent::Reconnecting { attempt });

            tokio::time::sleep(delay).await;

            // An explicit connect() may have landed during the backoff
            // sleep; checking under the connect lock keeps one socket live.
            let _guard = inner.connect_lock.lock().await;
            if inner.shutdown.load(Ordering::SeqCst)
                || inner.epoch.load(Ordering::SeqCst) != epoch
                || *inner.state_tx.borrow() == ConnectionState::Connected
            {
                debug!("Reconnect loop superseded");
                return;
            }

            match Self::establish(Arc::clone(&inner)).await {
                Ok(()) => return,
                Err(ChannelError::Authentication(reason)) => {
                    inner.state_tx.send_replace(ConnectionState::Disconnected);
                    let _ = inner
                        .event_tx
                        .send(ChannelEvent::AuthenticationFailed(reason));
                    return;
                }
                Err(e) => {
                    inner.record_error(&e);
                    warn!(attempt, error = %e, "Reconnect attempt failed");
                }
            }
        }

        warn!(
            attempts = inner.config.max_reconnect_attempts,
            "Reconnect budget exhausted"
        );
        inner.record_error(&ChannelError::RetriesExhausted {
            attempts: inner.config.max_reconnect_attempts,
        });
        inner.state_tx.send_replace(ConnectionState::Disconnected);
        let _ = inner.event_tx.send(ChannelEvent::Disconnected(Some(
            "reconnect attempts exhausted".to_string(),
        )));
    }

    fn handle_message(inner: &Arc<Inner>, msg: ChannelMessage) {
        if msg.msg_type == ChannelMessageType::Error {
            let reason = msg
                .error
                .clone()
                .unwrap_or_else(|| "unknown error".to_string());
            warn!(error = %reason, "Channel error message");
        } else {
            debug!(msg_type = ?msg.msg_type, "Received message");
        }
        inner.registry.dispatch(&msg);
        let _ = inner.event_tx.send(ChannelEvent::Message(msg));
    }
}

/// Delay before reconnect attempt `attempt` (1-based): exponential from the
/// base, capped at the configured maximum.
fn reconnect_delay(config: &ChannelConfig, attempt: u32) -> Duration {
    let delay = std::cmp::min(
        config
            .reconnect_base_delay_secs
            .saturating_mul(2u64.saturating_pow(attempt - 1)),
        config.reconnect_max_delay_secs,
    );
    Duration::from_secs(delay)
}
