//! Store: durable messages, rooms and users behind async traits.
//!
//! DESIGN
//! ======
//! Handlers only see the three traits. `PgStore` backs them with Postgres
//! when `DATABASE_URL` is set; `MemoryStore` backs them otherwise and in
//! tests. Both assign message timestamps from a [`MonotonicClock`] so
//! appends never go backwards in time.
//!
//! Single-document updates (reaction replace, read append, last-message
//! snapshot) are atomic in both backends.

pub mod memory;
pub mod postgres;

use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::services::message::{Message, MessageScope, NewMessage};
use crate::services::room::{LastMessage, NewRoom, Room};

pub use memory::MemoryStore;
pub use postgres::PgStore;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

impl ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        "persistence-error"
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Unavailable(_))
    }
}

// =============================================================================
// USERS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
}

// =============================================================================
// TRAITS
// =============================================================================

#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a validated message, assigning id and timestamp.
    async fn append(&self, msg: NewMessage) -> Result<Message, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError>;

    /// Replace the user's reaction. `None` when the message does not exist.
    async fn set_reaction(&self, id: Uuid, user_id: &str, emoji: &str) -> Result<Option<Message>, StoreError>;

    /// Mark read by `user_id`. Returns `false` when the message does not exist.
    async fn mark_read(&self, id: Uuid, user_id: &str, read_at: i64) -> Result<bool, StoreError>;

    /// Newest `limit` messages in `scope` older than `before`, oldest first.
    async fn recent(&self, scope: &MessageScope, before: Option<i64>, limit: usize) -> Result<Vec<Message>, StoreError>;
}

#[async_trait::async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn create(&self, room: NewRoom) -> Result<Room, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Room>, StoreError>;

    /// Active rooms listing `user_id`, most recently updated first.
    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<Room>, StoreError>;

    async fn update_last_message(&self, id: Uuid, last: LastMessage) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn upsert_user(&self, user: User) -> Result<(), StoreError>;

    /// Users whose id or name contains `query`, case-insensitively, ordered
    /// by name. At most `limit` results.
    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<User>, StoreError>;
}

// =============================================================================
// CLOCK
// =============================================================================

/// Millisecond clock that never returns a value below the previous one.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    #[must_use]
    pub fn starting_at(floor: i64) -> Self {
        Self { last: AtomicI64::new(floor) }
    }

    pub fn now(&self) -> i64 {
        let wall = crate::frame::now_ms();
        let prev = self.last.fetch_max(wall, Ordering::AcqRel);
        prev.max(wall)
    }
}

/// Clamp a requested page size into `1..=max`, defaulting when absent.
#[must_use]
pub fn clamp_limit(requested: Option<usize>, default: usize, max: usize) -> usize {
    requested.unwrap_or(default).clamp(1, max)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
