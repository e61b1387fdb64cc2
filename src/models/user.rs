//! Connected user model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix of the name given to users who connect without one
pub const ANONYMOUS_PREFIX: &str = "Anonymous_";

/// A user attached to one WebSocket connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    pub user_id: String,
    pub user_name: String,
    pub connection_id: String,
    pub is_online: bool,
    pub last_active_time: DateTime<Utc>,
}

impl UserInfo {
    /// Create an online user with a fresh user id
    pub fn new(user_name: impl Into<String>, connection_id: impl Into<String>) -> Self {
        Self {
            user_id: Uuid::new_v4().to_string(),
            user_name: user_name.into(),
            connection_id: connection_id.into(),
            is_online: true,
            last_active_time: Utc::now(),
        }
    }

    /// Create a user named after the first eight characters of its connection id
    pub fn anonymous(connection_id: impl Into<String>) -> Self {
        let connection_id = connection_id.into();
        Self::new(anonymous_name(&connection_id), connection_id)
    }

    /// Refresh the last activity time
    pub fn touch(&mut self) {
        self.last_active_time = Utc::now();
    }

    pub fn set_online(&mut self) {
        self.is_online = true;
        self.touch();
    }

    pub fn set_offline(&mut self) {
        self.is_online = false;
        self.touch();
    }

    /// Move the user to another connection
    pub fn update_connection_id(&mut self, connection_id: impl Into<String>) {
        self.connection_id = connection_id.into();
        self.touch();
    }
}

/// Name for a user who did not supply one
pub fn anonymous_name(connection_id: &str) -> String {
    let short: String = connection_id.chars().take(8).collect();
    format!("{}{}", ANONYMOUS_PREFIX, short)
}
