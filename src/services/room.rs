//! Chat room model.
//!
//! Rooms are created with their full participant list and only ever grow.
//! The creator is always the first participant and the only admin.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Public,
    Group,
    Private,
}

impl RoomKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Group => "group",
            Self::Private => "private",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "public" => Some(Self::Public),
            "group" => Some(Self::Group),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Member,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub user_id: String,
    pub role: Role,
    pub joined_at: i64,
}

/// Snapshot of the latest accepted group message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub content: String,
    pub timestamp: i64,
    pub sender_id: String,
}

impl From<&Message> for LastMessage {
    fn from(msg: &Message) -> Self {
        Self { content: msg.content.clone(), timestamp: msg.timestamp, sender_id: msg.sender_id.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: RoomKind,
    pub description: String,
    pub participants: Vec<Participant>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<LastMessage>,
    pub is_active: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Room {
    #[must_use]
    pub fn is_participant(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    #[must_use]
    pub fn participant_ids(&self) -> Vec<String> {
        self.participants.iter().map(|p| p.user_id.clone()).collect()
    }
}

// =============================================================================
// NEW ROOM
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRoom {
    pub name: String,
    pub kind: RoomKind,
    pub description: String,
    pub creator_id: String,
    pub members: Vec<String>,
}

impl NewRoom {
    /// # Errors
    ///
    /// Returns a reason when the name or creator is blank.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("room name is required".into());
        }
        if self.creator_id.trim().is_empty() {
            return Err("creatorId is required".into());
        }
        Ok(())
    }

    /// Creator first as admin, then each distinct member once.
    #[must_use]
    pub fn participants(&self, joined_at: i64) -> Vec<Participant> {
        let mut out = vec![Participant { user_id: self.creator_id.clone(), role: Role::Admin, joined_at }];
        for member in &self.members {
            let member = member.trim();
            if member.is_empty() || out.iter().any(|p| p.user_id == member) {
                continue;
            }
            out.push(Participant { user_id: member.to_string(), role: Role::Member, joined_at });
        }
        out
    }

    #[must_use]
    pub fn into_room(self, id: Uuid, now: i64) -> Room {
        let participants = self.participants(now);
        Room {
            id,
            name: self.name.trim().to_string(),
            kind: self.kind,
            description: self.description,
            participants,
            created_by: self.creator_id,
            last_message: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
