//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! One Axum router carries the chat WebSocket at `/api/ws` and a small REST
//! surface for history, rooms, uploads, user search, assistant suggestions
//! and presence. Uploaded files are served back from `/uploads`.

pub mod chat;
pub mod ws;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::services::upload::UPLOAD_URL_PREFIX;
use crate::state::AppState;

/// Room for multipart boundaries and part headers on top of the file itself.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let upload_limit = DefaultBodyLimit::max(state.config.upload_max_bytes.saturating_add(MULTIPART_OVERHEAD_BYTES));
    let uploads = ServeDir::new(&state.config.upload_dir);

    Router::new()
        .route("/api/ws", get(ws::handle_ws))
        .route("/api/messages", get(chat::list_messages))
        .route("/api/rooms", get(chat::list_rooms).post(chat::create_room))
        .route("/api/ai/suggestions", get(chat::suggestions))
        .route("/api/upload", post(chat::upload).layer(upload_limit))
        .route("/api/users/search", get(chat::search_users))
        .route("/api/users/online", get(chat::online_users))
        .nest_service(UPLOAD_URL_PREFIX, uploads)
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
