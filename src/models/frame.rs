//! Frames pushed by the server

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChatMessage, UserInfo};

/// Discriminator carried by presence list frames
pub const ONLINE_USERS_UPDATE: &str = "OnlineUsersUpdate";

/// Snapshot of everyone currently connected
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUsersUpdate {
    #[serde(rename = "type", alias = "Type")]
    pub kind: String,
    #[serde(alias = "Timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "Users")]
    pub users: Vec<UserInfo>,
}

impl OnlineUsersUpdate {
    pub fn new(users: Vec<UserInfo>) -> Self {
        Self {
            kind: ONLINE_USERS_UPDATE.to_string(),
            timestamp: Utc::now(),
            users,
        }
    }
}

/// Any frame a client can receive from the hub
#[derive(Debug, Clone, PartialEq)]
pub enum ServerFrame {
    Chat(ChatMessage),
    OnlineUsers(OnlineUsersUpdate),
}

impl ServerFrame {
    /// Parse a text frame received from the hub
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;

        let kind = value
            .get("type")
            .or_else(|| value.get("Type"))
            .and_then(|v| v.as_str());

        if kind == Some(ONLINE_USERS_UPDATE) {
            Ok(ServerFrame::OnlineUsers(serde_json::from_value(value)?))
        } else {
            Ok(ServerFrame::Chat(serde_json::from_value(value)?))
        }
    }
}
