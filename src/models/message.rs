//! Chat message model and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Sender id used for server-generated messages
pub const SYSTEM_USER_ID: &str = "system";

/// Sender name used for server-generated messages
pub const SYSTEM_USER_NAME: &str = "System";

/// Kind of a chat frame, encoded on the wire as its number
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum MessageType {
    /// Regular text sent by a user
    #[default]
    TextMessage = 0,
    /// A user joined the chat
    UserJoined = 1,
    /// A user left the chat
    UserLeft = 2,
    /// Notice generated by the server
    SystemNotification = 3,
    /// Error reported by the server
    Error = 4,
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            MessageType::TextMessage => "text_message",
            MessageType::UserJoined => "user_joined",
            MessageType::UserLeft => "user_left",
            MessageType::SystemNotification => "system_notification",
            MessageType::Error => "error",
        }
    }

    /// Whether this kind is reserved for the server
    pub fn is_system(&self) -> bool {
        !matches!(self, MessageType::TextMessage)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<MessageType> for u8 {
    fn from(value: MessageType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, String> {
        match value {
            0 => Ok(MessageType::TextMessage),
            1 => Ok(MessageType::UserJoined),
            2 => Ok(MessageType::UserLeft),
            3 => Ok(MessageType::SystemNotification),
            4 => Ok(MessageType::Error),
            other => Err(format!("Invalid message type: {}", other)),
        }
    }
}

/// A chat message as fanned out by the hub
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub message_id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub message_type: MessageType,
}

impl ChatMessage {
    /// Create a message with a fresh id stamped with the current time
    pub fn new(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        content: impl Into<String>,
        message_type: MessageType,
    ) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            content: content.into(),
            timestamp: Utc::now(),
            message_type,
        }
    }

    /// Create a text message
    pub fn text(
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(user_id, user_name, content, MessageType::TextMessage)
    }

    /// Create a system notification
    pub fn system(content: impl Into<String>) -> Self {
        Self::from_system(content, MessageType::SystemNotification)
    }

    /// Create the presence notice for a user who joined
    pub fn user_joined(user_name: &str) -> Self {
        Self::from_system(
            format!("{} joined the chat", user_name),
            MessageType::UserJoined,
        )
    }

    /// Create the presence notice for a user who left
    pub fn user_left(user_name: &str) -> Self {
        Self::from_system(format!("{} left the chat", user_name), MessageType::UserLeft)
    }

    /// Create an error notice
    pub fn error(content: impl Into<String>) -> Self {
        Self::from_system(content, MessageType::Error)
    }

    fn from_system(content: impl Into<String>, message_type: MessageType) -> Self {
        Self::new(SYSTEM_USER_ID, SYSTEM_USER_NAME, content, message_type)
    }

    /// Whether the message was generated by the server
    pub fn is_from_system(&self) -> bool {
        self.user_id == SYSTEM_USER_ID
    }
}

/// A message as sent by a client
///
/// Every field is optional and `null` counts as absent. Property names are
/// accepted in camelCase and PascalCase. Sender identity and timestamp are
/// always assigned by the server, so any the client sends are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InboundMessage {
    #[serde(alias = "MessageId")]
    pub message_id: Option<Uuid>,
    #[serde(alias = "Content", deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(alias = "MessageType", deserialize_with = "null_as_default")]
    pub message_type: MessageType,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl InboundMessage {
    /// Parse a text frame.
    ///
    /// Returns `Ok(None)` for the JSON literal `null`.
    pub fn parse(text: &str) -> Result<Option<Self>, serde_json::Error> {
        serde_json::from_str::<Option<Self>>(text)
    }

    /// Turn the client's message into the message the hub broadcasts.
    ///
    /// The sender fields come from the registered user and the timestamp is now.
    /// Clients can only send text, so any other message type is downgraded.
    pub fn into_chat_message(self, user_id: &str, user_name: &str) -> ChatMessage {
        ChatMessage {
            message_id: self.message_id.unwrap_or_else(Uuid::new_v4),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            content: self.content,
            timestamp: Utc::now(),
            message_type: MessageType::TextMessage,
        }
    }
}
