//! WebSocket handler: one connection session per socket.
//!
//! DESIGN
//! ======
//! On upgrade the socket gets an outbound channel and a [`Session`], then
//! enters a `select!` loop:
//! - Incoming text frames → parse → `Session::handle_frame`
//! - Frames queued on the channel (replies, errors, broadcasts) → socket
//!
//! Everything a client sees arrives through its channel, so per-connection
//! ordering is the channel order.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → register with the hub (unidentified)
//! 2. `user:online` identifies the session
//! 3. Binary or unparseable input gets one `error` frame, then the socket closes
//! 4. A hub eviction (outbound channel overflow) closes the socket
//! 5. Close → session cleanup (presence, typing, hub)

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::frame::Frame;
use crate::services::broadcast::ChatError;
use crate::services::hub::ConnectionHandle;
use crate::services::session::Session;
use crate::state::AppState;

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let (client_tx, mut client_rx) = mpsc::channel::<Frame>(state.config.client_channel_capacity);
    let handle = ConnectionHandle::new(client_tx);
    let evicted = Arc::clone(&handle.evicted);
    let mut session = Session::open(state.clone(), handle).await;
    let conn_id = session.conn_id();

    let connections = state.hub.connection_count().await;
    info!(%conn_id, connections, "ws: client connected");

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let inbound = match msg {
                    Message::Text(text) => parse_inbound(text.as_str()),
                    Message::Binary(_) => Err(ChatError::validation("binary frames are not supported")),
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                match inbound {
                    Ok(frame) => session.handle_frame(frame).await,
                    Err(e) => {
                        warn!(%conn_id, error = %e, "ws: malformed inbound frame; closing");
                        let _ = send_frame(&mut socket, &Frame::coded_error(&e)).await;
                        let _ = socket.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            Some(frame) = client_rx.recv() => {
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
            () = evicted.notified() => {
                warn!(%conn_id, "ws: evicted for falling behind; closing");
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
        }
    }

    session.close().await;
    info!(%conn_id, "ws: client disconnected");
}

/// Parse one inbound text message into a frame.
pub(crate) fn parse_inbound(text: &str) -> Result<Frame, ChatError> {
    let frame: Frame = serde_json::from_str(text).map_err(|e| ChatError::validation(format!("invalid json: {e}")))?;
    if frame.event.trim().is_empty() {
        return Err(ChatError::validation("event is required"));
    }
    Ok(frame)
}

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let Ok(json) = serde_json::to_string(frame) else {
        return Err(());
    };
    if frame.event == crate::frame::ERROR_EVENT {
        let code = frame
            .data
            .get(crate::frame::FRAME_CODE)
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        warn!(id = %frame.id, event = %frame.event, code, "ws: send error frame");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
