//! Chat message model.
//!
//! A message is immutable once accepted except for its reactions and read
//! state. The JSON shape is camelCase because it goes over the wire as-is.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Sender id stamped on every assistant reply.
pub const ASSISTANT_SENDER_ID: &str = "ai-bot";

// =============================================================================
// KINDS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// One-to-one. Named `private` on the wire.
    #[serde(rename = "private")]
    Direct,
    Public,
    Group,
    Ai,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "private",
            Self::Public => "public",
            Self::Group => "group",
            Self::Ai => "ai",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "private" => Some(Self::Direct),
            "public" => Some(Self::Public),
            "group" => Some(Self::Group),
            "ai" => Some(Self::Ai),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    Image,
    File,
    Document,
}

// =============================================================================
// PARTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentKind,
    pub filename: String,
    pub url: String,
    /// Byte size.
    #[serde(default)]
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: String,
    pub emoji: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    pub user_id: String,
    pub read_at: i64,
}

// =============================================================================
// MESSAGE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub sender_id: String,
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<Uuid>,
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    /// Question this assistant reply answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    /// Server-assigned, milliseconds since Unix epoch.
    pub timestamp: i64,
}

impl Message {
    /// Replace any previous reaction by `user_id` with `emoji`.
    pub fn apply_reaction(&mut self, user_id: &str, emoji: &str) {
        self.reactions.retain(|r| r.user_id != user_id);
        self.reactions.push(Reaction { user_id: user_id.to_string(), emoji: emoji.to_string() });
    }

    /// Record a read receipt. Returns `false` when `user_id` had already read it.
    pub fn mark_read(&mut self, user_id: &str, read_at: i64) -> bool {
        self.read = true;
        if self.read_by.iter().any(|r| r.user_id == user_id) {
            return false;
        }
        self.read_by.push(ReadReceipt { user_id: user_id.to_string(), read_at });
        true
    }

    /// True when `user_id` is the sender or the recipient of a direct message.
    #[must_use]
    pub fn is_party(&self, user_id: &str) -> bool {
        self.sender_id == user_id || self.recipient_id.as_deref() == Some(user_id)
    }
}

// =============================================================================
// NEW MESSAGE
// =============================================================================

/// A message accepted from a client, before the store assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub kind: MessageKind,
    pub sender_id: String,
    pub sender_name: String,
    pub recipient_id: Option<String>,
    pub room_id: Option<Uuid>,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub mentions: Vec<String>,
    pub reply_to: Option<Uuid>,
}

impl NewMessage {
    #[must_use]
    pub fn new(kind: MessageKind, sender_id: impl Into<String>, sender_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            kind,
            sender_id: sender_id.into(),
            sender_name: sender_name.into(),
            recipient_id: None,
            room_id: None,
            content: content.into(),
            attachments: Vec::new(),
            mentions: Vec::new(),
            reply_to: None,
        }
    }

    #[must_use]
    pub fn to_recipient(mut self, recipient_id: impl Into<String>) -> Self {
        self.recipient_id = Some(recipient_id.into());
        self
    }

    #[must_use]
    pub fn in_room(mut self, room_id: Option<Uuid>) -> Self {
        self.room_id = room_id;
        self
    }

    #[must_use]
    pub fn answering(mut self, question_id: Uuid) -> Self {
        self.reply_to = Some(question_id);
        self
    }

    /// Check the shape rules every stored message obeys.
    ///
    /// # Errors
    ///
    /// Returns a human-readable reason when the message is malformed.
    pub fn validate(&self, max_content_chars: usize) -> Result<(), String> {
        if self.sender_id.trim().is_empty() {
            return Err("senderId is required".into());
        }
        if self.content.trim().is_empty() {
            return Err("content must not be empty".into());
        }
        if self.content.chars().count() > max_content_chars {
            return Err(format!("content exceeds {max_content_chars} characters"));
        }
        match self.kind {
            MessageKind::Direct => {
                if self.recipient_id.as_deref().is_none_or(|r| r.trim().is_empty()) {
                    return Err("recipientId is required for private messages".into());
                }
                if self.room_id.is_some() {
                    return Err("private messages cannot target a room".into());
                }
            }
            MessageKind::Group if self.room_id.is_none() => {
                return Err("roomId is required for group messages".into());
            }
            MessageKind::Public | MessageKind::Group | MessageKind::Ai => {
                if self.recipient_id.is_some() {
                    return Err("recipientId is only valid on private messages".into());
                }
            }
        }
        Ok(())
    }

    /// Materialize with a store-assigned id and timestamp.
    #[must_use]
    pub fn into_message(self, id: Uuid, timestamp: i64) -> Message {
        Message {
            id,
            kind: self.kind,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            recipient_id: self.recipient_id,
            room_id: self.room_id,
            content: self.content,
            attachments: self.attachments,
            mentions: self.mentions,
            reactions: Vec::new(),
            read: false,
            read_by: Vec::new(),
            reply_to: self.reply_to,
            timestamp,
        }
    }
}

// =============================================================================
// SCOPE
// =============================================================================

/// A conversation context, used for history queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageScope {
    /// Public feed: public and assistant messages outside any room.
    Public,
    /// Everything posted in one room.
    Room(Uuid),
    /// Private messages between two users, either direction.
    Direct(String, String),
    /// One user's assistant exchange, in a room or outside any room: their
    /// questions plus the replies that answer them.
    Assistant { room_id: Option<Uuid>, user_id: String },
}

impl MessageScope {
    /// Whether `msg` belongs to the scope on its own fields. Assistant
    /// replies are matched through their question with [`Self::answers`].
    #[must_use]
    pub fn matches(&self, msg: &Message) -> bool {
        match self {
            Self::Public => msg.room_id.is_none() && matches!(msg.kind, MessageKind::Public | MessageKind::Ai),
            Self::Room(room_id) => msg.room_id == Some(*room_id),
            Self::Direct(a, b) => {
                msg.kind == MessageKind::Direct
                    && msg.recipient_id.is_some()
                    && ((msg.sender_id == *a && msg.recipient_id.as_deref() == Some(b.as_str()))
                        || (msg.sender_id == *b && msg.recipient_id.as_deref() == Some(a.as_str())))
            }
            Self::Assistant { room_id, user_id } => {
                msg.kind == MessageKind::Ai && msg.room_id == *room_id && msg.sender_id == *user_id
            }
        }
    }

    /// Whether `reply` is an assistant answer to `question` and the question
    /// is part of an assistant scope.
    #[must_use]
    pub fn answers(&self, reply: &Message, question: &Message) -> bool {
        matches!(self, Self::Assistant { .. })
            && reply.sender_id == ASSISTANT_SENDER_ID
            && reply.reply_to == Some(question.id)
            && self.matches(question)
    }
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
