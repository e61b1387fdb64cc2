//! Reconnecting WebSocket client for the chat hub
//!
//! A [`ChatClient`] owns one session at a time. The read half of the socket is
//! driven by a background task that publishes [`ClientEvent`]s on a broadcast
//! channel; the write half is shared behind a mutex so any task can send.
//! When the server goes away unexpectedly the session task runs the same
//! linear backoff as [`ChatClient::reconnect`] before giving up.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, Ordering},
    Arc, Mutex as StdMutex, PoisonError, RwLock,
};
use std::time::Duration;

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{net::TcpStream, sync::broadcast, sync::Mutex};
use tokio_stream::wrappers::BroadcastStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    models::{ChatMessage, ServerFrame, UserInfo},
    utils::ClientError,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection id reported for the local user until the server assigns one
pub const PENDING_CONNECTION_ID: &str = "pending";

const DISCONNECT_REASON: &str = "Client disconnected";

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub endpoint, e.g. `ws://127.0.0.1:5051/ws`
    pub server_url: String,
    pub user_name: String,
    pub max_reconnect_attempts: u32,
    /// Base delay; attempt `n` waits `reconnect_delay * n`
    pub reconnect_delay: Duration,
    pub auto_reconnect: bool,
    /// Capacity of the event channel
    pub event_buffer: usize,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, user_name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            user_name: user_name.into(),
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(3000),
            auto_reconnect: true,
            event_buffer: 256,
        }
    }

    /// The upgrade URL carrying the percent-encoded user name
    pub fn connect_url(&self) -> Result<String, ClientError> {
        let base = self.server_url.trim();
        if !(base.starts_with("ws://") || base.starts_with("wss://")) {
            return Err(ClientError::InvalidUrl(format!(
                "{} (expected a ws:// or wss:// URL)",
                base
            )));
        }

        let separator = if base.contains('?') { '&' } else { '?' };
        Ok(format!(
            "{}{}username={}",
            base,
            separator,
            urlencoding::encode(&self.user_name)
        ))
    }
}

/// Something the client observed
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    ConnectionStateChanged(bool),
    MessageReceived(ChatMessage),
    OnlineUsersUpdated(Vec<UserInfo>),
    Error(String),
}

/// Handle to a chat hub connection
///
/// Cloning yields another handle to the same connection.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: ClientConfig,
    connected: AtomicBool,
    attempts: AtomicU32,
    current_user: RwLock<UserInfo>,
    online_users: RwLock<Vec<UserInfo>>,
    events: broadcast::Sender<ClientEvent>,
    sink: Mutex<Option<WsSink>>,
    session: StdMutex<CancellationToken>,
}

impl ChatClient {
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let current_user = UserInfo::new(config.user_name.clone(), PENDING_CONNECTION_ID);

        Self {
            inner: Arc::new(ClientInner {
                config,
                connected: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                current_user: RwLock::new(current_user),
                online_users: RwLock::new(Vec::new()),
                events,
                sink: Mutex::new(None),
                session: StdMutex::new(CancellationToken::new()),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    pub fn current_user(&self) -> UserInfo {
        self.inner
            .current_user
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Users listed by the most recent presence frame
    pub fn online_users(&self) -> Vec<UserInfo> {
        self.inner
            .online_users
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Attempts made by the current reconnect cycle
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.inner.events.subscribe()
    }

    /// Events as a stream; lagging subscribers see `Err` items
    pub fn events(&self) -> BroadcastStream<ClientEvent> {
        BroadcastStream::new(self.subscribe())
    }

    /// Open the connection and start receiving
    pub async fn connect(&self) -> Result<(), ClientError> {
        if self.is_connected() {
            return Err(ClientError::AlreadyConnected);
        }

        let stream = match self.inner.dial().await {
            Ok(stream) => stream,
            Err(e) => {
                self.inner.emit(ClientEvent::Error(format!("Connection failed: {}", e)));
                return Err(e);
            }
        };

        self.inner.start_session(stream).await;
        Ok(())
    }

    /// Send a text message as the current user
    pub async fn send_text(&self, content: impl Into<String>) -> Result<(), ClientError> {
        let user = self.current_user();
        let message = ChatMessage::text(user.user_id, user.user_name, content);
        self.send_message(&message).await
    }

    pub async fn send_message(&self, message: &ChatMessage) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let text = serde_json::to_string(message)?;
        let mut guard = self.inner.sink.lock().await;
        let sink = guard.as_mut().ok_or(ClientError::NotConnected)?;
        sink.send(Message::text(text)).await?;

        debug!(message_id = %message.message_id, "Message sent");
        Ok(())
    }

    /// Close the connection; does nothing when already disconnected
    pub async fn disconnect(&self) {
        self.inner.current_session().cancel();

        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let frame = Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: DISCONNECT_REASON.into(),
            }));
            if let Err(e) = sink.send(frame).await {
                debug!(error = %e, "Close frame not delivered");
            }
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Failed to close socket");
            }
        }

        if self.inner.mark_disconnected() {
            info!("Disconnected from chat hub");
        }
    }

    /// Drop the current connection and dial again with linear backoff
    pub async fn reconnect(&self) -> Result<(), ClientError> {
        self.disconnect().await;

        let token = self.inner.new_session();
        let stream = self.inner.dial_with_backoff(&token).await?;
        self.inner.attach(stream, token).await;
        Ok(())
    }
}

impl ClientInner {
    fn emit(&self, event: ClientEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn current_session(&self) -> CancellationToken {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn new_session(&self) -> CancellationToken {
        let token = CancellationToken::new();
        let mut guard = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        guard.cancel();
        *guard = token.clone();
        token
    }

    async fn dial(&self) -> Result<WsStream, ClientError> {
        let url = self.config.connect_url()?;
        debug!(url = %url, "Connecting to chat hub");
        let (stream, _response) = connect_async(url).await?;
        Ok(stream)
    }

    async fn dial_with_backoff(&self, token: &CancellationToken) -> Result<WsStream, ClientError> {
        let max = self.config.max_reconnect_attempts;

        for attempt in 1..=max {
            self.attempts.store(attempt, Ordering::SeqCst);

            if attempt > 1 {
                let delay = self.config.reconnect_delay * attempt;
                debug!(attempt, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
                tokio::select! {
                    _ = token.cancelled() => return Err(ClientError::NotConnected),
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            info!(attempt, max, "Reconnecting to chat hub");
            match self.dial().await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    warn!(attempt, max, error = %e, "Reconnect attempt failed");
                    self.emit(ClientEvent::Error(format!(
                        "Reconnect failed (attempt {}/{}): {}",
                        attempt, max, e
                    )));
                }
            }
        }

        self.emit(ClientEvent::Error(
            "Maximum reconnect attempts reached".to_string(),
        ));
        Err(ClientError::ReconnectExhausted(max))
    }

    async fn start_session(self: &Arc<Self>, stream: WsStream) {
        let token = self.new_session();
        self.attach(stream, token).await;
    }

    /// Install a freshly dialed socket and spawn its session task
    async fn attach(self: &Arc<Self>, stream: WsStream, token: CancellationToken) {
        let source = self.install(stream).await;
        tokio::spawn(Arc::clone(self).run_session(source, token));
    }

    async fn install(&self, stream: WsStream) -> WsSource {
        let (sink, source) = stream.split();
        *self.sink.lock().await = Some(sink);

        self.attempts.store(0, Ordering::SeqCst);
        self.current_user
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_online();
        self.connected.store(true, Ordering::SeqCst);

        info!(user_name = %self.config.user_name, "Connected to chat hub");
        self.emit(ClientEvent::ConnectionStateChanged(true));
        source
    }

    /// Returns true if this call changed the state
    fn mark_disconnected(&self) -> bool {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return false;
        }
        self.current_user
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .set_offline();
        self.emit(ClientEvent::ConnectionStateChanged(false));
        true
    }

    async fn run_session(self: Arc<Self>, mut source: WsSource, token: CancellationToken) {
        loop {
            if !self.read_frames(&mut source, &token).await {
                return;
            }

            self.sink.lock().await.take();
            self.mark_disconnected();

            if !self.config.auto_reconnect || token.is_cancelled() {
                return;
            }

            match self.dial_with_backoff(&token).await {
                Ok(stream) => source = self.install(stream).await,
                Err(e) => {
                    warn!(error = %e, "Giving up on chat hub");
                    return;
                }
            }
        }
    }

    /// Returns false when the session was cancelled locally
    async fn read_frames(&self, source: &mut WsSource, token: &CancellationToken) -> bool {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => return false,
                next = source.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => self.handle_text(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    info!(reason = ?frame.map(|f| f.reason.to_string()), "Server closed the connection");
                    return true;
                }
                Some(Ok(Message::Binary(_))) => warn!("Ignoring binary frame"),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket error");
                    self.emit(ClientEvent::Error(format!("Connection lost: {}", e)));
                    return true;
                }
                None => return true,
            }
        }
    }

    fn handle_text(&self, text: &str) {
        match ServerFrame::parse(text) {
            Ok(ServerFrame::OnlineUsers(update)) => {
                *self
                    .online_users
                    .write()
                    .unwrap_or_else(PoisonError::into_inner) = update.users.clone();
                self.emit(ClientEvent::OnlineUsersUpdated(update.users));
            }
            Ok(ServerFrame::Chat(message)) => {
                self.emit(ClientEvent::MessageReceived(message));
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse message");
                self.emit(ClientEvent::Error(format!("Failed to parse message: {}", e)));
            }
        }
    }
}
