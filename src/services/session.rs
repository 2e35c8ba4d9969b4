//! Connection session: per-socket state machine and inbound dispatch.
//!
//! LIFECYCLE
//! =========
//! `Connecting → Identified → Closed`.
//! 1. The socket registers with the hub and starts in `Connecting`.
//! 2. `user:online` identifies it: presence entry, personal channel binding,
//!    subscription to every room the user belongs to, `users:online`.
//! 3. Further frames dispatch by event prefix to the broadcast router.
//! 4. Close deregisters presence, clears typing state and leaves the hub.
//!
//! Errors never reach the socket directly: they become `error` frames queued
//! on this connection's outbound channel, correlated by `parent_id`.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use super::broadcast::{self, Caller, ChatError, TypingTarget};
use super::hub::{Audience, ConnectionHandle};
use super::message::{ASSISTANT_SENDER_ID, Attachment, MessageKind, NewMessage};
use super::room::{NewRoom, RoomKind};
use crate::frame::{ErrorCode, Frame};
use crate::state::AppState;

/// Identity bound by `user:online`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub user_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Identified(Identity),
    Closed,
}

pub struct Session {
    state: AppState,
    handle: ConnectionHandle,
    phase: SessionState,
    /// Recipients this session is currently showing direct typing to.
    direct_typing: HashSet<String>,
}

impl Session {
    /// Register a new connection with the hub. The session starts
    /// unidentified.
    pub async fn open(state: AppState, handle: ConnectionHandle) -> Self {
        state.hub.register(&handle).await;
        Self { state, handle, phase: SessionState::Connecting, direct_typing: HashSet::new() }
    }

    #[must_use]
    pub fn conn_id(&self) -> Uuid {
        self.handle.conn_id
    }

    #[must_use]
    pub fn identity(&self) -> Option<&Identity> {
        match &self.phase {
            SessionState::Identified(identity) => Some(identity),
            SessionState::Connecting | SessionState::Closed => None,
        }
    }

    /// Handle one inbound frame. Failures are delivered to this connection
    /// as `error` frames.
    pub async fn handle_frame(&mut self, frame: Frame) {
        if self.phase == SessionState::Closed {
            return;
        }
        info!(conn_id = %self.handle.conn_id, id = %frame.id, event = %frame.event, "session: recv frame");

        if let Err(e) = self.dispatch(&frame).await {
            warn!(conn_id = %self.handle.conn_id, event = %frame.event, code = e.error_code(), error = %e, "session: request rejected");
            self.state
                .hub
                .deliver(Audience::Connection(self.handle.conn_id), &frame.error_from(&e))
                .await;
        }
    }

    async fn dispatch(&mut self, frame: &Frame) -> Result<(), ChatError> {
        if frame.event == "user:online" {
            return self.identify(frame).await;
        }
        let caller = self.caller()?;

        match frame.prefix() {
            "message" => self.handle_message(&caller, frame).await,
            "typing" => self.handle_typing(&caller, frame).await,
            "room" => match frame.op() {
                "create" => self.handle_room_create(&caller, frame).await,
                op => Err(ChatError::validation(format!("unknown room op: {op}"))),
            },
            _ => Err(ChatError::validation(format!("unknown event: {}", frame.event))),
        }
    }

    fn caller(&self) -> Result<Caller, ChatError> {
        let Some(identity) = self.identity() else {
            return Err(ChatError::validation("identify with user:online first"));
        };
        Ok(Caller {
            conn_id: self.handle.conn_id,
            user_id: identity.user_id.clone(),
            user_name: identity.user_name.clone(),
        })
    }

    // =========================================================================
    // IDENTIFY
    // =========================================================================

    async fn identify(&mut self, frame: &Frame) -> Result<(), ChatError> {
        let (Some(user_id), Some(user_name)) = (frame.str_field("userId"), frame.str_field("userName")) else {
            return Err(ChatError::validation("userId and userName are required"));
        };
        if user_id == ASSISTANT_SENDER_ID {
            return Err(ChatError::validation(format!("{ASSISTANT_SENDER_ID} is reserved for the assistant")));
        }

        if let Some(current) = self.identity() {
            if current.user_id != user_id {
                return Err(ChatError::validation("connection is already identified as another user"));
            }
        }

        if self.state.config.require_known_users && self.state.users.find_user(user_id).await?.is_none() {
            return Err(ChatError::validation(format!("unknown user {user_id}")));
        }

        let first = self.identity().is_none();
        let online = self.state.presence.set_online(user_id, user_name, self.handle.clone());
        self.phase = SessionState::Identified(Identity { user_id: user_id.to_string(), user_name: user_name.to_string() });

        if first {
            self.state.hub.bind_user(self.handle.conn_id, user_id).await;
            let rooms = match self.state.rooms.rooms_for_user(user_id).await {
                Ok(rooms) => rooms,
                Err(e) => {
                    warn!(conn_id = %self.handle.conn_id, %user_id, error = %e, "session: room memberships unavailable");
                    Vec::new()
                }
            };
            for room in &rooms {
                self.state.hub.subscribe(self.handle.conn_id, room.id).await;
            }
            info!(conn_id = %self.handle.conn_id, %user_id, rooms = rooms.len(), "session: identified");
        } else {
            info!(conn_id = %self.handle.conn_id, %user_id, "session: display name refreshed");
        }

        broadcast::broadcast_online(&self.state, &online).await;
        Ok(())
    }

    // =========================================================================
    // MESSAGES
    // =========================================================================

    async fn handle_message(&mut self, caller: &Caller, frame: &Frame) -> Result<(), ChatError> {
        match frame.op() {
            "private" => {
                let recipient = frame
                    .str_field("recipientId")
                    .ok_or_else(|| ChatError::validation("recipientId is required for private messages"))?;
                let msg = new_message(frame, caller, MessageKind::Direct)?.to_recipient(recipient);
                broadcast::send_direct(&self.state, caller, msg, Some(frame.id)).await?;
            }
            "public" => {
                let msg = new_message(frame, caller, MessageKind::Public)?;
                broadcast::send_public(&self.state, caller, msg).await?;
            }
            "group" => {
                let msg = new_message(frame, caller, MessageKind::Group)?.in_room(room_id_field(frame)?);
                broadcast::send_group(&self.state, caller, msg).await?;
            }
            "ai" => {
                let msg = new_message(frame, caller, MessageKind::Ai)?.in_room(room_id_field(frame)?);
                let user_context = frame.data.get("userContext");
                // The reply task runs on its own; the session does not wait for it.
                let _ = broadcast::send_ai(&self.state, caller, msg, user_context, Some(frame.id)).await?;
            }
            "read" => {
                check_user_field(frame, caller)?;
                let message_id = message_id_field(frame)?;
                drop(broadcast::mark_read(&self.state, caller, message_id));
            }
            "react" => {
                check_user_field(frame, caller)?;
                let message_id = message_id_field(frame)?;
                let emoji = frame.str_field("emoji").ok_or_else(|| ChatError::validation("emoji is required"))?;
                broadcast::react(&self.state, caller, message_id, emoji).await?;
            }
            op => return Err(ChatError::validation(format!("unknown message op: {op}"))),
        }
        Ok(())
    }

    // =========================================================================
    // TYPING
    // =========================================================================

    async fn handle_typing(&mut self, caller: &Caller, frame: &Frame) -> Result<(), ChatError> {
        check_user_field(frame, caller)?;
        let target = match (room_id_field(frame)?, frame.str_field("recipientId")) {
            (Some(room_id), _) => TypingTarget::Room(room_id),
            (None, Some(recipient)) => TypingTarget::Direct(recipient.to_string()),
            (None, None) => return Err(ChatError::validation("roomId or recipientId is required")),
        };

        match frame.op() {
            "start" => {
                broadcast::start_typing(&self.state, caller, &target).await?;
                if let TypingTarget::Direct(recipient) = target {
                    self.direct_typing.insert(recipient);
                }
            }
            "stop" => {
                broadcast::stop_typing(&self.state, caller, &target).await?;
                if let TypingTarget::Direct(recipient) = &target {
                    self.direct_typing.remove(recipient);
                }
            }
            op => return Err(ChatError::validation(format!("unknown typing op: {op}"))),
        }
        Ok(())
    }

    // =========================================================================
    // ROOMS
    // =========================================================================

    async fn handle_room_create(&mut self, caller: &Caller, frame: &Frame) -> Result<(), ChatError> {
        let creator_id = frame.str_field("creatorId").unwrap_or(&caller.user_id);
        if creator_id != caller.user_id {
            return Err(ChatError::validation("creatorId does not match the identified user"));
        }
        let members: Vec<String> = optional_list(frame, "participants")?;
        let room = NewRoom {
            name: frame.str_field("name").unwrap_or_default().to_string(),
            kind: RoomKind::Group,
            description: frame.str_field("description").unwrap_or_default().to_string(),
            creator_id: caller.user_id.clone(),
            members,
        };
        broadcast::create_room(&self.state, room).await?;
        Ok(())
    }

    // =========================================================================
    // CLOSE
    // =========================================================================

    /// Tear down everything this connection owns. Idempotent.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.phase, SessionState::Closed);
        if previous == SessionState::Closed {
            return;
        }
        self.state.hub.unregister(self.handle.conn_id).await;

        let SessionState::Identified(identity) = previous else {
            info!(conn_id = %self.handle.conn_id, "session: closed before identifying");
            return;
        };

        if self.state.presence.remove(&self.handle).is_some() {
            broadcast::broadcast_online(&self.state, &self.state.presence.snapshot()).await;
        }
        for update in self.state.typing.remove_user(&identity.user_id) {
            self.state
                .hub
                .deliver(Audience::Room(update.room_id), &update.frame())
                .await;
        }
        for recipient in std::mem::take(&mut self.direct_typing) {
            broadcast::hide_direct_typing(&self.state, &identity.user_id, &recipient).await;
        }
        info!(conn_id = %self.handle.conn_id, user_id = %identity.user_id, "session: closed");
    }
}

// =============================================================================
// FRAME FIELDS
// =============================================================================

/// Build an unvalidated message from the common send fields. `senderId`
/// and `senderName` default to the session identity.
fn new_message(frame: &Frame, caller: &Caller, kind: MessageKind) -> Result<NewMessage, ChatError> {
    let sender_id = frame.str_field("senderId").unwrap_or(&caller.user_id);
    let sender_name = frame.str_field("senderName").unwrap_or(&caller.user_name);
    let content = frame.data.get("content").and_then(Value::as_str).unwrap_or_default();

    let mut msg = NewMessage::new(kind, sender_id, sender_name, content);
    msg.attachments = optional_list::<Attachment>(frame, "attachments")?;
    msg.mentions = optional_list(frame, "mentions")?;
    Ok(msg)
}

fn optional_list<T: DeserializeOwned>(frame: &Frame, key: &str) -> Result<Vec<T>, ChatError> {
    match frame.data.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => {
            serde_json::from_value(value.clone()).map_err(|e| ChatError::validation(format!("invalid {key}: {e}")))
        }
    }
}

/// `roomId` is optional, but when present it must be a UUID.
fn room_id_field(frame: &Frame) -> Result<Option<Uuid>, ChatError> {
    match frame.data.get("roomId") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(_) => frame
            .uuid_field("roomId")
            .map(Some)
            .ok_or_else(|| ChatError::validation("roomId must be a UUID")),
    }
}

fn message_id_field(frame: &Frame) -> Result<Uuid, ChatError> {
    frame
        .uuid_field("messageId")
        .ok_or_else(|| ChatError::validation("messageId must be a UUID"))
}

/// Reject a `userId` that names someone other than the caller.
fn check_user_field(frame: &Frame, caller: &Caller) -> Result<(), ChatError> {
    match frame.str_field("userId") {
        Some(user_id) if user_id != caller.user_id => Err(ChatError::validation("userId does not match the identified user")),
        _ => Ok(()),
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
