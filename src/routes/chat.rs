//! Chat history, room, upload and user REST routes.

use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;
use serde_json::json;
use tracing::error;
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::services::assistant::SUGGESTED_QUESTIONS;
use crate::services::broadcast::{self, ChatError};
use crate::services::message::{Message, MessageScope};
use crate::services::room::{NewRoom, Room, RoomKind};
use crate::services::upload::{self, UploadError, UploadedFile};
use crate::state::AppState;
use crate::store::{User, clamp_limit};

const DEFAULT_PAGE: usize = 50;
const MAX_PAGE: usize = 200;
const MIN_SEARCH_CHARS: usize = 2;
const MAX_SEARCH_RESULTS: usize = 10;

/// JSON error body `{ error, code }` with a status derived from the code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "validation-error", message: message.into() }
    }
}

impl From<ChatError> for ApiError {
    fn from(err: ChatError) -> Self {
        let status = chat_error_to_status(&err);
        if status.is_server_error() {
            error!(error = %err, "chat route failed");
        }
        Self { status, code: err.error_code(), message: err.to_string() }
    }
}

impl From<crate::store::StoreError> for ApiError {
    fn from(err: crate::store::StoreError) -> Self {
        ChatError::from(err).into()
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        let status = match &err {
            UploadError::Missing => StatusCode::BAD_REQUEST,
            UploadError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %err, "upload failed");
        }
        Self { status, code: err.error_code(), message: err.to_string() }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self { status: err.status(), code: "validation-error", message: err.body_text() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message, "code": self.code }))).into_response()
    }
}

pub(crate) fn chat_error_to_status(err: &ChatError) -> StatusCode {
    match err {
        ChatError::Validation(_) => StatusCode::BAD_REQUEST,
        ChatError::NotAParticipant(_) => StatusCode::FORBIDDEN,
        ChatError::Persistence(_) | ChatError::Assistant(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    pub room_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub user_id: Option<String>,
    pub other_user_id: Option<String>,
    pub before: Option<i64>,
    pub limit: Option<usize>,
}

impl MessagesQuery {
    /// `type=private` with both ids selects the pair, `roomId` a room,
    /// anything else the public feed.
    pub(crate) fn scope(&self) -> MessageScope {
        let pair = (self.user_id.as_deref().map(str::trim), self.other_user_id.as_deref().map(str::trim));
        match (self.kind.as_deref(), pair) {
            (Some("private"), (Some(a), Some(b))) if !a.is_empty() && !b.is_empty() => {
                MessageScope::Direct(a.to_string(), b.to_string())
            }
            _ => match self.room_id {
                Some(room_id) => MessageScope::Room(room_id),
                None => MessageScope::Public,
            },
        }
    }
}

/// `GET /api/messages`: oldest-first page of the newest messages in scope.
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let limit = clamp_limit(query.limit, DEFAULT_PAGE, MAX_PAGE);
    let page = state
        .messages
        .recent(&query.scope(), query.before, limit)
        .await?;
    Ok(Json(page))
}

// =============================================================================
// ROOMS
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomsQuery {
    pub user_id: Option<String>,
}

/// `GET /api/rooms?userId=`: the user's active rooms, latest activity first.
pub async fn list_rooms(
    State(state): State<AppState>,
    Query(query): Query<RoomsQuery>,
) -> Result<Json<Vec<Room>>, ApiError> {
    let Some(user_id) = query.user_id.as_deref().map(str::trim).filter(|u| !u.is_empty()) else {
        return Err(ApiError::bad_request("userId required"));
    };
    Ok(Json(state.rooms.rooms_for_user(user_id).await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomBody {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_by: String,
    #[serde(default)]
    pub participants: Vec<String>,
}

/// `POST /api/rooms`: create a group room and announce it to live members.
pub async fn create_room(
    State(state): State<AppState>,
    Json(body): Json<CreateRoomBody>,
) -> Result<(StatusCode, Json<Room>), ApiError> {
    let room = NewRoom {
        name: body.name,
        kind: RoomKind::Group,
        description: body.description,
        creator_id: body.created_by.trim().to_string(),
        members: body.participants,
    };
    let room = broadcast::create_room(&state, room).await?;
    Ok((StatusCode::CREATED, Json(room)))
}

// =============================================================================
// UPLOADS
// =============================================================================

/// `POST /api/upload`: multipart field `file`; returns the attachment record.
pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<UploadedFile>, ApiError> {
    let max = state.config.upload_max_bytes;
    while let Some(mut field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let original = field.file_name().unwrap_or("file").to_string();
        let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        if upload::accepted_kind(&content_type).is_none() {
            return Err(UploadError::UnsupportedType(content_type).into());
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.chunk().await? {
            if bytes.len() + chunk.len() > max {
                return Err(UploadError::TooLarge(max).into());
            }
            bytes.extend_from_slice(&chunk);
        }
        let uploaded = upload::save(&state.config.upload_dir, &original, &content_type, &bytes, max).await?;
        return Ok(Json(uploaded));
    }
    Err(UploadError::Missing.into())
}

// =============================================================================
// USERS, ASSISTANT & PRESENCE
// =============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct UserSearchQuery {
    pub query: Option<String>,
}

/// `GET /api/users/search?query=`: up to ten users by name or id. Queries
/// shorter than two characters return nothing.
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<UserSearchQuery>,
) -> Result<Json<Vec<User>>, ApiError> {
    let needle = query.query.as_deref().map(str::trim).unwrap_or_default();
    if needle.chars().count() < MIN_SEARCH_CHARS {
        return Ok(Json(Vec::new()));
    }
    Ok(Json(state.users.search_users(needle, MAX_SEARCH_RESULTS).await?))
}

/// `GET /api/ai/suggestions`
pub async fn suggestions() -> Json<serde_json::Value> {
    Json(json!({ "suggestions": SUGGESTED_QUESTIONS }))
}

/// `GET /api/users/online`
pub async fn online_users(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "users": state.presence.snapshot() }))
}

#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;
