//! Chat hub: connection registry and message fan-out

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

use crate::models::{ChatMessage, OnlineUsersUpdate, UserInfo};

/// Close reason sent to every client when the hub shuts down
pub const SHUTDOWN_REASON: &str = "Server shutting down";

/// Sending half of a connection's outbound frame queue
pub type Outbound = mpsc::Sender<Message>;

/// A registered connection
struct Connection {
    user: UserInfo,
    outbound: Outbound,
}

/// Registry of live connections and the fan-out over them
///
/// Each connection is represented by the sender of a bounded queue that a
/// dedicated writer task drains into the socket. Nothing here awaits a socket,
/// so one slow client cannot stall delivery to the others.
#[derive(Default)]
pub struct ChatService {
    connections: RwLock<HashMap<String, Connection>>,
    shutting_down: AtomicBool,
}

impl ChatService {
    /// Create an empty hub
    pub fn new() -> Self {
        info!("Chat service initialized");
        Self::default()
    }

    /// Number of users currently connected
    pub fn online_user_count(&self) -> usize {
        self.read().len()
    }

    /// Users currently connected
    pub fn online_users(&self) -> Vec<UserInfo> {
        self.read().values().map(|c| c.user.clone()).collect()
    }

    /// Whether `cleanup_all_connections` has been called
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Register a connection and announce the new user to everyone.
    ///
    /// If the id is already registered, or the hub is shutting down, nothing is
    /// registered or announced and the returned user is not part of the registry.
    pub fn add_connection(
        &self,
        connection_id: &str,
        user_name: &str,
        outbound: Outbound,
    ) -> UserInfo {
        let user = UserInfo::new(user_name, connection_id);

        let inserted = {
            let mut connections = self.write();
            if self.is_shutting_down() {
                None
            } else {
                match connections.entry(connection_id.to_string()) {
                    Entry::Occupied(_) => Some(false),
                    Entry::Vacant(slot) => {
                        slot.insert(Connection {
                            user: user.clone(),
                            outbound,
                        });
                        Some(true)
                    }
                }
            }
        };

        let Some(inserted) = inserted else {
            info!(connection_id = %connection_id, "Hub is shutting down, connection not registered");
            return user;
        };

        if !inserted {
            warn!(
                connection_id = %connection_id,
                "Failed to add connection, id already registered"
            );
            return user;
        }

        info!(
            user_name = %user.user_name,
            user_id = %user.user_id,
            connection_id = %connection_id,
            "User connected"
        );

        self.broadcast_message(&ChatMessage::user_joined(user_name));
        self.broadcast_online_users();

        user
    }

    /// Unregister a connection and tell everyone the user left.
    ///
    /// Nothing is announced once the hub is shutting down.
    ///
    /// Returns the user's name, or `None` if the id was not registered.
    pub fn remove_connection(&self, connection_id: &str) -> Option<String> {
        let removed = self.write().remove(connection_id);

        let Some(connection) = removed else {
            debug!(connection_id = %connection_id, "Tried to remove unknown connection");
            return None;
        };

        let user_name = connection.user.user_name;
        info!(
            user_name = %user_name,
            user_id = %connection.user.user_id,
            connection_id = %connection_id,
            "User disconnected"
        );

        if !self.is_shutting_down() {
            self.broadcast_message(&ChatMessage::user_left(&user_name));
            self.broadcast_online_users();
        }

        Some(user_name)
    }

    /// Outbound queue of a connection
    pub fn get_connection(&self, connection_id: &str) -> Option<Outbound> {
        self.read()
            .get(connection_id)
            .map(|c| c.outbound.clone())
    }

    /// User registered on a connection
    pub fn get_user_info(&self, connection_id: &str) -> Option<UserInfo> {
        self.read().get(connection_id).map(|c| c.user.clone())
    }

    /// Record activity on a connection
    pub fn touch(&self, connection_id: &str) {
        if let Some(connection) = self.write().get_mut(connection_id) {
            connection.user.touch();
        }
    }

    /// Send a message to every open connection.
    ///
    /// Returns how many connections accepted the frame.
    pub fn broadcast_message(&self, message: &ChatMessage) -> usize {
        debug!(
            message_type = %message.message_type,
            content = %message.content,
            "Broadcasting message"
        );
        match encode(message) {
            Some(text) => self.broadcast_text(text),
            None => 0,
        }
    }

    /// Send a message to a single connection.
    ///
    /// Returns `false` if the connection is unknown or no longer open.
    pub fn send_message_to_user(&self, connection_id: &str, message: &ChatMessage) -> bool {
        let (user_name, outbound) = match self.read().get(connection_id) {
            Some(c) => (c.user.user_name.clone(), c.outbound.clone()),
            None => {
                warn!(connection_id = %connection_id, "Tried to send to unknown connection");
                return false;
            }
        };

        if outbound.is_closed() {
            warn!(connection_id = %connection_id, "Tried to send to closed connection");
            return false;
        }

        debug!(
            user_name = %user_name,
            message_type = %message.message_type,
            content = %message.content,
            "Sending message to user"
        );

        match encode(message) {
            Some(text) => enqueue(connection_id, &outbound, Message::Text(text)),
            None => false,
        }
    }

    /// Broadcast a system notification
    pub fn send_system_message(&self, content: &str) -> usize {
        self.broadcast_message(&ChatMessage::system(content))
    }

    /// Push the current online user list to every connection
    pub fn broadcast_online_users(&self) -> usize {
        let update = OnlineUsersUpdate::new(self.online_users());
        let count = update.users.len();

        let delivered = match encode(&update) {
            Some(text) => self.broadcast_text(text),
            None => 0,
        };

        debug!(online_users = count, delivered, "Broadcast online user list");
        delivered
    }

    /// Ask every connection to close and empty the registry
    pub fn cleanup_all_connections(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        let drained: Vec<(String, Connection)> = self.write().drain().collect();
        info!(count = drained.len(), "Cleaning up all connections");

        for (connection_id, connection) in drained {
            if connection.outbound.is_closed() {
                continue;
            }
            let frame = Message::Close(Some(CloseFrame {
                code: close_code::NORMAL,
                reason: Utf8Bytes::from_static(SHUTDOWN_REASON),
            }));
            enqueue(&connection_id, &connection.outbound, frame);
        }
    }

    fn broadcast_text(&self, text: Utf8Bytes) -> usize {
        let connections = self.read();
        let mut delivered = 0;

        for (connection_id, connection) in connections.iter() {
            if connection.outbound.is_closed() {
                debug!(connection_id = %connection_id, "Skipping closed connection");
                continue;
            }
            if enqueue(connection_id, &connection.outbound, Message::Text(text.clone())) {
                delivered += 1;
            }
        }

        delivered
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Connection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Connection>> {
        self.connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ChatService {
    fn drop(&mut self) {
        info!("Chat service shutting down");
    }
}

fn encode<T: Serialize>(value: &T) -> Option<Utf8Bytes> {
    match serde_json::to_string(value) {
        Ok(text) => Some(Utf8Bytes::from(text)),
        Err(e) => {
            error!(error = %e, "Failed to serialize frame");
            None
        }
    }
}

fn enqueue(connection_id: &str, outbound: &Outbound, frame: Message) -> bool {
    match outbound.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(connection_id = %connection_id, "Outbound queue full, dropping frame");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(connection_id = %connection_id, "Outbound queue closed");
            false
        }
    }
}
