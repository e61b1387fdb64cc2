//! Presence and announcement endpoints

use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    models::UserInfo,
    utils::{validation::validate_announcement, AppError, AppResult},
    AppState,
};

/// Online user listing
#[derive(Debug, Serialize, Deserialize)]
pub struct OnlineUsersResponse {
    pub count: usize,
    pub users: Vec<UserInfo>,
}

/// Body of an announcement
#[derive(Debug, Deserialize)]
pub struct AnnouncementRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct AnnouncementResponse {
    pub delivered: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_online_users))
        .route("/announcements", post(create_announcement))
}

/// List everyone currently connected
async fn list_online_users(State(state): State<AppState>) -> Json<OnlineUsersResponse> {
    let mut users = state.chat.online_users();
    users.sort_by(|a, b| a.user_name.cmp(&b.user_name));

    Json(OnlineUsersResponse {
        count: users.len(),
        users,
    })
}

/// Broadcast a system notification to every connection
async fn create_announcement(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AnnouncementRequest>,
) -> AppResult<Json<AnnouncementResponse>> {
    if let Some(ref expected) = state.config.chat.announce_token {
        let provided = headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        if provided != Some(expected.as_str()) {
            return Err(AppError::Unauthorized(
                "A valid announcement token is required".to_string(),
            ));
        }
    }

    if state.chat.is_shutting_down() {
        return Err(AppError::ServiceUnavailable(
            "Chat hub is shutting down".to_string(),
        ));
    }

    if !validate_announcement(&req.content, state.config.chat.max_message_bytes) {
        return Err(AppError::BadRequest(
            "Announcement content must be non-empty and within the message size limit"
                .to_string(),
        ));
    }

    let delivered = state.chat.send_system_message(req.content.trim());
    info!(delivered, "Announcement broadcast");

    Ok(Json(AnnouncementResponse { delivered }))
}
