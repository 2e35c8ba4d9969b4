//! Broadcast router: validate, persist, then fan out.
//!
//! DESIGN
//! ======
//! Each handler runs three phases: validation (`validation-error` or
//! `not-a-participant`), persistence (`persistence-error`, nothing is
//! delivered), and fan-out through the [`Hub`](super::hub::Hub). Appends and
//! their fan-out run under `AppState::fanout_gate`, so every connection sees
//! accepted messages in store order.
//!
//! Handlers never write to a socket. The session turns a returned
//! [`ChatError`] into an `error` frame for the originating connection.

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use super::assistant::{self, ASSISTANT_SENDER_NAME, AssistantError, UserContext};
use super::hub::Audience;
use super::message::{ASSISTANT_SENDER_ID, Message, MessageKind, MessageScope, NewMessage};
use super::presence::OnlineUser;
use super::room::{LastMessage, NewRoom, Room};
use crate::frame::{Data, ErrorCode, Frame};
use crate::state::AppState;
use crate::store::StoreError;

pub const USERS_ONLINE: &str = "users:online";
pub const MESSAGE_RECEIVED: &str = "message:received";
pub const MESSAGE_SENT: &str = "message:sent";
pub const MESSAGE_PUBLIC: &str = "message:public";
pub const MESSAGE_GROUP: &str = "message:group";
pub const MESSAGE_AI: &str = "message:ai";
pub const MESSAGE_UPDATED: &str = "message:updated";
pub const AI_TYPING: &str = "ai:typing";
pub const ROOM_CREATED: &str = "room:created";
pub const TYPING_SHOW: &str = "typing:show";
pub const TYPING_HIDE: &str = "typing:hide";

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("not a participant of {0}")]
    NotAParticipant(String),
    #[error("failed to save: {0}")]
    Persistence(#[from] StoreError),
    #[error(transparent)]
    Assistant(#[from] AssistantError),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl ErrorCode for ChatError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation-error",
            Self::NotAParticipant(_) => "not-a-participant",
            Self::Persistence(e) => e.error_code(),
            Self::Assistant(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::NotAParticipant(_) => false,
            Self::Persistence(e) => e.retryable(),
            Self::Assistant(e) => e.retryable(),
        }
    }
}

// =============================================================================
// CALLER
// =============================================================================

/// The identified connection a request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub conn_id: Uuid,
    pub user_id: String,
    pub user_name: String,
}

/// Where a typing signal goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypingTarget {
    Room(Uuid),
    Direct(String),
}

fn message_frame(event: &str, msg: &Message) -> Frame {
    Frame::from_value(event, msg)
}

/// Room traffic goes to the room; room-less assistant traffic is public.
fn ai_audience(room_id: Option<Uuid>) -> (Audience<'static>, &'static str) {
    match room_id {
        Some(room_id) => (Audience::Room(room_id), MESSAGE_AI),
        None => (Audience::Everyone, MESSAGE_PUBLIC),
    }
}

fn check_new(state: &AppState, caller: &Caller, msg: &NewMessage) -> Result<(), ChatError> {
    if msg.sender_id != caller.user_id {
        return Err(ChatError::validation("senderId does not match the identified user"));
    }
    if msg.sender_id == ASSISTANT_SENDER_ID {
        return Err(ChatError::validation(format!("{ASSISTANT_SENDER_ID} is reserved for the assistant")));
    }
    msg.validate(state.config.max_content_chars).map_err(ChatError::Validation)
}

async fn require_participant(state: &AppState, room_id: Uuid, user_id: &str) -> Result<Room, ChatError> {
    let Some(room) = state.rooms.get(room_id).await? else {
        return Err(ChatError::validation(format!("unknown room {room_id}")));
    };
    if !room.is_participant(user_id) {
        return Err(ChatError::NotAParticipant(format!("room {room_id}")));
    }
    Ok(room)
}

// =============================================================================
// PRESENCE
// =============================================================================

pub async fn broadcast_online(state: &AppState, users: &[OnlineUser]) {
    let frame = Frame::new(USERS_ONLINE, Data::new()).with_data("users", serde_json::to_value(users).unwrap_or_default());
    state.hub.deliver(Audience::Everyone, &frame).await;
}

// =============================================================================
// SEND
// =============================================================================

/// `message:private`: recipient tabs get `message:received`, sender tabs
/// get `message:sent` correlated to the request.
///
/// # Errors
///
/// Validation or persistence failure; nothing is delivered in either case.
pub async fn send_direct(
    state: &AppState,
    caller: &Caller,
    msg: NewMessage,
    request_id: Option<Uuid>,
) -> Result<Message, ChatError> {
    check_new(state, caller, &msg)?;

    let _gate = state.fanout_gate.lock().await;
    let stored = state.messages.append(msg).await?;
    let recipient = stored.recipient_id.as_deref().unwrap_or_default();

    let received = message_frame(MESSAGE_RECEIVED, &stored);
    let delivered = state.hub.deliver(Audience::User(recipient), &received).await;
    let recipient_online = state.presence.is_online(recipient);

    let mut sent = message_frame(MESSAGE_SENT, &stored);
    sent.parent_id = request_id;
    state.hub.deliver(Audience::User(&caller.user_id), &sent).await;

    info!(conn_id = %caller.conn_id, user_id = %caller.user_id, recipient, recipient_online, delivered, "message: private sent");
    Ok(stored)
}

/// `message:public`: every connection.
///
/// # Errors
///
/// Validation or persistence failure.
pub async fn send_public(state: &AppState, caller: &Caller, msg: NewMessage) -> Result<Message, ChatError> {
    check_new(state, caller, &msg)?;

    let _gate = state.fanout_gate.lock().await;
    let stored = state.messages.append(msg).await?;
    let delivered = state
        .hub
        .deliver(Audience::Everyone, &message_frame(MESSAGE_PUBLIC, &stored))
        .await;

    info!(conn_id = %caller.conn_id, user_id = %caller.user_id, delivered, "message: public sent");
    Ok(stored)
}

/// `message:group`: every connection subscribed to the room. The room's
/// last-message snapshot is refreshed under the same gate; a failure there
/// is logged and does not fail the send.
///
/// # Errors
///
/// Unknown room, non-participant sender, or persistence failure.
pub async fn send_group(state: &AppState, caller: &Caller, msg: NewMessage) -> Result<Message, ChatError> {
    check_new(state, caller, &msg)?;
    let room_id = msg.room_id.ok_or_else(|| ChatError::validation("roomId is required for group messages"))?;
    require_participant(state, room_id, &caller.user_id).await?;

    let _gate = state.fanout_gate.lock().await;
    let stored = state.messages.append(msg).await?;
    state
        .hub
        .deliver(Audience::Room(room_id), &message_frame(MESSAGE_GROUP, &stored))
        .await;

    if let Err(e) = state
        .rooms
        .update_last_message(room_id, LastMessage::from(&stored))
        .await
    {
        warn!(%room_id, error = %e, "room: last message update failed");
    }

    info!(conn_id = %caller.conn_id, user_id = %caller.user_id, %room_id, "message: group sent");
    Ok(stored)
}

/// `message:ai`: persist and deliver the question, then answer it from a
/// spawned task. The returned handle resolves once the reply (or the
/// failure) has been delivered.
///
/// # Errors
///
/// Validation, participation or persistence failure for the question.
pub async fn send_ai(
    state: &AppState,
    caller: &Caller,
    msg: NewMessage,
    user_context: Option<&Value>,
    request_id: Option<Uuid>,
) -> Result<(Message, JoinHandle<()>), ChatError> {
    check_new(state, caller, &msg)?;
    if let Some(room_id) = msg.room_id {
        require_participant(state, room_id, &caller.user_id).await?;
    }

    let stored = {
        let _gate = state.fanout_gate.lock().await;
        let stored = state.messages.append(msg).await?;
        let (audience, event) = ai_audience(stored.room_id);
        state.hub.deliver(audience, &message_frame(event, &stored)).await;
        stored
    };
    info!(conn_id = %caller.conn_id, user_id = %caller.user_id, room_id = ?stored.room_id, "ai: question received");

    let task = tokio::spawn(answer_question(
        state.clone(),
        caller.clone(),
        stored.clone(),
        UserContext::from_value(user_context),
        request_id,
    ));
    Ok((stored, task))
}

fn ai_typing_frame(typing: bool) -> Frame {
    Frame::new(AI_TYPING, Data::new()).with_data("typing", typing)
}

async fn answer_question(
    state: AppState,
    caller: Caller,
    question: Message,
    ctx: UserContext,
    request_id: Option<Uuid>,
) {
    let requester = Audience::Connection(caller.conn_id);
    state.hub.deliver(requester, &ai_typing_frame(true)).await;

    let outcome = match reply_to(&state, &caller, &question, &ctx).await {
        Ok(text) => persist_and_deliver_reply(&state, caller.conn_id, &question, text).await,
        Err(e) => Err(ChatError::from(e)),
    };

    match outcome {
        Ok(reply) => info!(conn_id = %caller.conn_id, reply_id = %reply.id, "ai: reply delivered"),
        Err(e) => {
            warn!(conn_id = %caller.conn_id, user_id = %caller.user_id, error = %e, "ai: reply failed");
            state.hub.deliver(requester, &ai_typing_frame(false)).await;
            let mut err = Frame::coded_error(&e);
            err.parent_id = request_id;
            state.hub.deliver(requester, &err).await;
        }
    }
}

async fn reply_to(
    state: &AppState,
    caller: &Caller,
    question: &Message,
    ctx: &UserContext,
) -> Result<String, AssistantError> {
    let Some(llm) = state.llm.as_deref() else {
        return Err(AssistantError::NotConfigured);
    };

    let limits = state.config.assistant;
    let scope = MessageScope::Assistant { room_id: question.room_id, user_id: caller.user_id.clone() };
    let window = limits.history_turns.saturating_mul(2);
    let history = match state.messages.recent(&scope, None, window + 1).await {
        Ok(mut page) => {
            page.retain(|m| m.id != question.id);
            let skip = page.len().saturating_sub(window);
            page.split_off(skip)
        }
        Err(e) => {
            warn!(user_id = %caller.user_id, error = %e, "ai: history unavailable; answering without it");
            Vec::new()
        }
    };

    assistant::generate_reply(llm, &limits, ctx, &history, &question.content).await
}

/// Persist the reply, stop the requester's typing indicator, then broadcast.
async fn persist_and_deliver_reply(
    state: &AppState,
    requester: Uuid,
    question: &Message,
    text: String,
) -> Result<Message, ChatError> {
    let reply =
        NewMessage::new(MessageKind::Ai, ASSISTANT_SENDER_ID, ASSISTANT_SENDER_NAME, text)
            .in_room(question.room_id)
            .answering(question.id);

    let _gate = state.fanout_gate.lock().await;
    let stored = state.messages.append(reply).await?;
    state
        .hub
        .deliver(Audience::Connection(requester), &ai_typing_frame(false))
        .await;
    let (audience, event) = ai_audience(stored.room_id);
    state.hub.deliver(audience, &message_frame(event, &stored)).await;
    Ok(stored)
}

// =============================================================================
// REACTIONS & READ STATE
// =============================================================================

/// Replace the caller's reaction and re-broadcast the message to the same
/// audience that saw it originally.
///
/// # Errors
///
/// Unknown message, caller outside the conversation, or persistence failure.
pub async fn react(state: &AppState, caller: &Caller, message_id: Uuid, emoji: &str) -> Result<Message, ChatError> {
    let emoji = emoji.trim();
    if emoji.is_empty() {
        return Err(ChatError::validation("emoji is required"));
    }
    let Some(existing) = state.messages.get(message_id).await? else {
        return Err(ChatError::validation(format!("unknown message {message_id}")));
    };
    match (existing.kind, existing.room_id) {
        (_, Some(room_id)) => {
            require_participant(state, room_id, &caller.user_id).await?;
        }
        (MessageKind::Direct, None) if !existing.is_party(&caller.user_id) => {
            return Err(ChatError::NotAParticipant("this private conversation".into()));
        }
        _ => {}
    }

    let _gate = state.fanout_gate.lock().await;
    let Some(updated) = state.messages.set_reaction(message_id, &caller.user_id, emoji).await? else {
        return Err(ChatError::validation(format!("unknown message {message_id}")));
    };
    let frame = message_frame(MESSAGE_UPDATED, &updated);
    match (updated.kind, updated.room_id) {
        (_, Some(room_id)) => {
            state.hub.deliver(Audience::Room(room_id), &frame).await;
        }
        (MessageKind::Direct, None) => {
            state.hub.deliver(Audience::User(&updated.sender_id), &frame).await;
            if let Some(recipient) = updated.recipient_id.as_deref().filter(|r| *r != updated.sender_id) {
                state.hub.deliver(Audience::User(recipient), &frame).await;
            }
        }
        _ => {
            state.hub.deliver(Audience::Everyone, &frame).await;
        }
    }

    info!(user_id = %caller.user_id, %message_id, emoji, "message: reaction set");
    Ok(updated)
}

/// Record a read receipt in the background. Nothing is broadcast and
/// failures are only logged.
pub fn mark_read(state: &AppState, caller: &Caller, message_id: Uuid) -> JoinHandle<()> {
    let messages = state.messages.clone();
    let user_id = caller.user_id.clone();
    tokio::spawn(async move {
        match messages.mark_read(message_id, &user_id, crate::frame::now_ms()).await {
            Ok(true) => {}
            Ok(false) => warn!(%message_id, %user_id, "message: read receipt for unknown message"),
            Err(e) => warn!(%message_id, %user_id, error = %e, "message: read receipt failed"),
        }
    })
}

// =============================================================================
// ROOMS
// =============================================================================

/// Create a room, subscribe every live connection of its participants, and
/// announce it to them with `room:created`.
///
/// # Errors
///
/// Validation or persistence failure.
pub async fn create_room(state: &AppState, room: NewRoom) -> Result<Room, ChatError> {
    room.validate().map_err(ChatError::Validation)?;

    let room = state.rooms.create(room).await?;
    let subscribed = state.hub.subscribe_users(&room.participant_ids(), room.id).await;
    state
        .hub
        .deliver(Audience::Room(room.id), &Frame::from_value(ROOM_CREATED, &room))
        .await;

    info!(room_id = %room.id, creator = %room.created_by, participants = room.participants.len(), subscribed, "room: created");
    Ok(room)
}

// =============================================================================
// TYPING
// =============================================================================

fn direct_typing_frame(event: &str, user_id: &str) -> Frame {
    Frame::new(event, Data::new()).with_data("userId", user_id)
}

/// # Errors
///
/// `not-a-participant` when the connection is not subscribed to the room.
pub async fn start_typing(state: &AppState, caller: &Caller, target: &TypingTarget) -> Result<(), ChatError> {
    match target {
        TypingTarget::Room(room_id) => {
            if !state.hub.is_subscribed(caller.conn_id, *room_id).await {
                return Err(ChatError::NotAParticipant(format!("room {room_id}")));
            }
            let update = state.typing.start(*room_id, &caller.user_id);
            state.hub.deliver(Audience::Room(*room_id), &update.frame()).await;
        }
        TypingTarget::Direct(recipient) => {
            state
                .hub
                .deliver(Audience::User(recipient), &direct_typing_frame(TYPING_SHOW, &caller.user_id))
                .await;
        }
    }
    Ok(())
}

/// # Errors
///
/// `not-a-participant` when the connection is not subscribed to the room.
pub async fn stop_typing(state: &AppState, caller: &Caller, target: &TypingTarget) -> Result<(), ChatError> {
    match target {
        TypingTarget::Room(room_id) => {
            if !state.hub.is_subscribed(caller.conn_id, *room_id).await {
                return Err(ChatError::NotAParticipant(format!("room {room_id}")));
            }
            if let Some(update) = state.typing.stop(*room_id, &caller.user_id) {
                state.hub.deliver(Audience::Room(*room_id), &update.frame()).await;
            }
        }
        TypingTarget::Direct(recipient) => hide_direct_typing(state, &caller.user_id, recipient).await,
    }
    Ok(())
}

pub async fn hide_direct_typing(state: &AppState, user_id: &str, recipient: &str) {
    state
        .hub
        .deliver(Audience::User(recipient), &direct_typing_frame(TYPING_HIDE, user_id))
        .await;
}

#[cfg(test)]
#[path = "broadcast_test.rs"]
mod tests;
