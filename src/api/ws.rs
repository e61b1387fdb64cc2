//! WebSocket endpoint
//!
//! Every upgraded connection gets a server-assigned id, a bounded outbound
//! queue drained by its own writer task, and a receive loop that turns text
//! frames into broadcast chat messages.

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::{IntoResponse, Response},
};
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    models::{ChatMessage, InboundMessage, UserInfo},
    services::{ChatService, SHUTDOWN_REASON},
    utils::{validation::resolve_user_name, AppError},
    AppState,
};

/// Query parameters of the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub username: Option<String>,
}

/// What happened to one inbound text frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processed {
    /// Broadcast to this many connections
    Broadcast(usize),
    /// Not valid JSON for a chat message; the sender was told
    Rejected,
    /// The frame was `null`
    Ignored,
}

/// Upgrade handler for the chat endpoint
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    if state.chat.is_shutting_down() {
        return AppError::ServiceUnavailable("Chat hub is shutting down".to_string())
            .into_response();
    }

    info!(username = ?params.username, "WebSocket connection requested");

    let max_bytes = state.config.chat.max_message_bytes;
    ws.max_message_size(max_bytes)
        .max_frame_size(max_bytes)
        .on_failed_upgrade(|e| warn!(error = %e, "WebSocket upgrade failed"))
        .on_upgrade(move |socket| handle_socket(socket, params.username, state))
}

async fn handle_socket(socket: WebSocket, requested_name: Option<String>, state: AppState) {
    let connection_id = Uuid::new_v4().to_string();
    let user_name = resolve_user_name(
        requested_name.as_deref(),
        &connection_id,
        state.config.chat.max_username_length,
    );
    info!(
        connection_id = %connection_id,
        user_name = %user_name,
        "WebSocket connection established"
    );

    let (sink, stream) = socket.split();
    let (tx, rx) = mpsc::channel(state.config.chat.outbound_buffer);
    let writer = tokio::spawn(write_frames(
        sink,
        rx,
        connection_id.clone(),
        state.shutdown.clone(),
    ));

    let user = state.chat.add_connection(&connection_id, &user_name, tx);

    let welcome = ChatMessage::system(format!("Welcome {} to the chat!", user_name));
    state.chat.send_message_to_user(&connection_id, &welcome);

    let reason = receive_frames(stream, &state, &connection_id, &user).await;

    // Dropping the registry's sender lets the writer flush and close the socket.
    state.chat.remove_connection(&connection_id);
    if let Err(e) = writer.await {
        error!(connection_id = %connection_id, error = %e, "Writer task failed");
    }

    info!(
        connection_id = %connection_id,
        reason = reason,
        "WebSocket connection handling finished"
    );
}

async fn receive_frames(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    connection_id: &str,
    user: &UserInfo,
) -> &'static str {
    loop {
        let next = tokio::select! {
            _ = state.shutdown.cancelled() => return "server shutting down",
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Text(text))) => {
                process_text(&state.chat, connection_id, user, text.as_str());
            }
            Some(Ok(Message::Binary(_))) => {
                warn!(connection_id = %connection_id, "Binary frames are not supported");
            }
            Some(Ok(Message::Close(frame))) => {
                info!(
                    connection_id = %connection_id,
                    code = ?frame.as_ref().map(|f| f.code),
                    "Received close frame"
                );
                return "client requested close";
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
            Some(Err(e)) => {
                info!(
                    connection_id = %connection_id,
                    error = %e,
                    "WebSocket connection closed prematurely"
                );
                return "connection closed prematurely";
            }
            None => return "connection closed",
        }
    }
}

async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
    connection_id: String,
    shutdown: CancellationToken,
) {
    while let Some(frame) = rx.recv().await {
        let is_close = matches!(frame, Message::Close(_));
        if let Err(e) = sink.send(frame).await {
            debug!(connection_id = %connection_id, error = %e, "Failed to write frame");
            return;
        }
        if is_close {
            return;
        }
    }

    // The queue ended without an explicit close frame.
    let reason = if shutdown.is_cancelled() {
        SHUTDOWN_REASON
    } else {
        "Connection closed"
    };
    let frame = Message::Close(Some(CloseFrame {
        code: close_code::NORMAL,
        reason: Utf8Bytes::from_static(reason),
    }));
    if let Err(e) = sink.send(frame).await {
        debug!(connection_id = %connection_id, error = %e, "Close frame not delivered");
    }
}

/// Handle one text frame from `user`
pub fn process_text(
    chat: &ChatService,
    connection_id: &str,
    user: &UserInfo,
    text: &str,
) -> Processed {
    debug!(connection_id = %connection_id, message = %text, "Received message");

    let inbound = match InboundMessage::parse(text) {
        Ok(Some(inbound)) => inbound,
        Ok(None) => {
            warn!(connection_id = %connection_id, "Received null message");
            return Processed::Ignored;
        }
        Err(e) => {
            warn!(connection_id = %connection_id, error = %e, "Failed to parse message");
            let reply = ChatMessage::system(format!("Invalid message format: {}", e));
            chat.send_message_to_user(connection_id, &reply);
            return Processed::Rejected;
        }
    };

    if inbound.message_type.is_system() {
        debug!(
            connection_id = %connection_id,
            message_type = %inbound.message_type,
            "Downgrading client message to text"
        );
    }

    let message = inbound.into_chat_message(&user.user_id, &user.user_name);
    chat.touch(connection_id);

    info!(
        user_name = %user.user_name,
        content = %message.content,
        "User sent message"
    );

    Processed::Broadcast(chat.broadcast_message(&message))
}
