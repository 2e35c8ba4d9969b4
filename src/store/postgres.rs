//! Postgres-backed store.
//!
//! Lists on a message (attachments, mentions, reactions, read receipts) and
//! a room's participants are `jsonb` columns, so reaction replace and read
//! append are single `UPDATE` statements and never read-modify-write.

use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, QueryBuilder, Row};
use uuid::Uuid;

use super::{MessageStore, MonotonicClock, RoomDirectory, StoreError, User, UserDirectory};
use crate::services::message::{
    ASSISTANT_SENDER_ID, Attachment, Message, MessageKind, MessageScope, NewMessage, ReadReceipt, Reaction,
};
use crate::services::room::{LastMessage, NewRoom, Participant, Room, RoomKind};

const MESSAGE_COLUMNS: &str = "id, kind, sender_id, sender_name, recipient_id, room_id, content, \
     attachments, mentions, reactions, read, read_by, reply_to, created_at";

const ROOM_COLUMNS: &str =
    "id, name, kind, description, participants, created_by, last_message, is_active, created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
    clock: MonotonicClock,
}

impl PgStore {
    /// Wrap a migrated pool. The message clock resumes from the newest
    /// stored timestamp so restarts never append into the past.
    ///
    /// # Errors
    ///
    /// Returns a database error if the seed query fails.
    pub async fn new(pool: PgPool) -> Result<Self, StoreError> {
        let floor: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(created_at), 0)::BIGINT FROM messages")
            .fetch_one(&pool)
            .await?;
        Ok(Self { pool, clock: MonotonicClock::starting_at(floor) })
    }
}

// =============================================================================
// ROW MAPPING
// =============================================================================

fn message_from_row(row: &PgRow) -> Result<Message, StoreError> {
    let kind: String = row.try_get("kind")?;
    let kind = MessageKind::parse(&kind).ok_or_else(|| StoreError::Corrupt(format!("unknown message kind '{kind}'")))?;
    let Json(attachments): Json<Vec<Attachment>> = row.try_get("attachments")?;
    let Json(mentions): Json<Vec<String>> = row.try_get("mentions")?;
    let Json(reactions): Json<Vec<Reaction>> = row.try_get("reactions")?;
    let Json(read_by): Json<Vec<ReadReceipt>> = row.try_get("read_by")?;

    Ok(Message {
        id: row.try_get("id")?,
        kind,
        sender_id: row.try_get("sender_id")?,
        sender_name: row.try_get("sender_name")?,
        recipient_id: row.try_get("recipient_id")?,
        room_id: row.try_get("room_id")?,
        content: row.try_get("content")?,
        attachments,
        mentions,
        reactions,
        read: row.try_get("read")?,
        read_by,
        reply_to: row.try_get("reply_to")?,
        timestamp: row.try_get("created_at")?,
    })
}

fn room_from_row(row: &PgRow) -> Result<Room, StoreError> {
    let kind: String = row.try_get("kind")?;
    let kind = RoomKind::parse(&kind).ok_or_else(|| StoreError::Corrupt(format!("unknown room kind '{kind}'")))?;
    let Json(participants): Json<Vec<Participant>> = row.try_get("participants")?;
    let last_message: Option<Json<LastMessage>> = row.try_get("last_message")?;

    Ok(Room {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        kind,
        description: row.try_get("description")?,
        participants,
        created_by: row.try_get("created_by")?,
        last_message: last_message.map(|Json(l)| l),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn push_scope(builder: &mut QueryBuilder<'_, sqlx::Postgres>, scope: &MessageScope) {
    match scope {
        MessageScope::Public => {
            builder.push("room_id IS NULL AND kind IN ('public', 'ai')");
        }
        MessageScope::Room(room_id) => {
            builder.push("room_id = ");
            builder.push_bind(*room_id);
        }
        MessageScope::Direct(a, b) => {
            builder.push("kind = 'private' AND ((sender_id = ");
            builder.push_bind(a.clone());
            builder.push(" AND recipient_id = ");
            builder.push_bind(b.clone());
            builder.push(") OR (sender_id = ");
            builder.push_bind(b.clone());
            builder.push(" AND recipient_id = ");
            builder.push_bind(a.clone());
            builder.push("))");
        }
        MessageScope::Assistant { room_id, user_id } => {
            builder.push("kind = 'ai' AND room_id IS NOT DISTINCT FROM ");
            builder.push_bind(*room_id);
            builder.push(" AND (sender_id = ");
            builder.push_bind(user_id.clone());
            builder.push(" OR (sender_id = ");
            builder.push_bind(ASSISTANT_SENDER_ID);
            builder.push(" AND reply_to IN (SELECT q.id FROM messages q WHERE q.kind = 'ai' AND q.sender_id = ");
            builder.push_bind(user_id.clone());
            builder.push(")))");
        }
    }
}

// =============================================================================
// MESSAGES
// =============================================================================

#[async_trait::async_trait]
impl MessageStore for PgStore {
    async fn append(&self, msg: NewMessage) -> Result<Message, StoreError> {
        let stored = msg.into_message(Uuid::new_v4(), self.clock.now());
        sqlx::query(
            "INSERT INTO messages (id, kind, sender_id, sender_name, recipient_id, room_id, content, \
                 attachments, mentions, reply_to, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(stored.id)
        .bind(stored.kind.as_str())
        .bind(&stored.sender_id)
        .bind(&stored.sender_name)
        .bind(&stored.recipient_id)
        .bind(stored.room_id)
        .bind(&stored.content)
        .bind(Json(&stored.attachments))
        .bind(Json(&stored.mentions))
        .bind(stored.reply_to)
        .bind(stored.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let row = sqlx::query(&format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn set_reaction(&self, id: Uuid, user_id: &str, emoji: &str) -> Result<Option<Message>, StoreError> {
        let sql = format!(
            "UPDATE messages SET reactions = ( \
                 SELECT COALESCE(jsonb_agg(e.r ORDER BY e.i), '[]'::jsonb) \
                 FROM jsonb_array_elements(reactions) WITH ORDINALITY AS e(r, i) \
                 WHERE e.r->>'userId' <> $2 \
             ) || jsonb_build_array(jsonb_build_object('userId', $2::text, 'emoji', $3::text)) \
             WHERE id = $1 \
             RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(user_id)
            .bind(emoji)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(message_from_row).transpose()
    }

    async fn mark_read(&self, id: Uuid, user_id: &str, read_at: i64) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET read = TRUE, read_by = CASE \
                 WHEN read_by @> jsonb_build_array(jsonb_build_object('userId', $2::text)) THEN read_by \
                 ELSE read_by || jsonb_build_array(jsonb_build_object('userId', $2::text, 'readAt', $3::bigint)) \
             END \
             WHERE id = $1",
        )
        .bind(id)
        .bind(user_id)
        .bind(read_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn recent(&self, scope: &MessageScope, before: Option<i64>, limit: usize) -> Result<Vec<Message>, StoreError> {
        let mut builder = QueryBuilder::new(format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE "));
        push_scope(&mut builder, scope);
        if let Some(before) = before {
            builder.push(" AND created_at < ");
            builder.push_bind(before);
        }
        builder.push(" ORDER BY created_at DESC, seq DESC LIMIT ");
        builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));

        let rows = builder.build().fetch_all(&self.pool).await?;
        let mut page = rows.iter().map(message_from_row).collect::<Result<Vec<_>, _>>()?;
        page.reverse();
        Ok(page)
    }
}

// =============================================================================
// ROOMS
// =============================================================================

#[async_trait::async_trait]
impl RoomDirectory for PgStore {
    async fn create(&self, room: NewRoom) -> Result<Room, StoreError> {
        let room = room.into_room(Uuid::new_v4(), self.clock.now());
        sqlx::query(
            "INSERT INTO rooms (id, name, kind, description, participants, created_by, is_active, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(room.id)
        .bind(&room.name)
        .bind(room.kind.as_str())
        .bind(&room.description)
        .bind(Json(&room.participants))
        .bind(&room.created_by)
        .bind(room.is_active)
        .bind(room.created_at)
        .bind(room.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(room)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Room>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(room_from_row).transpose()
    }

    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<Room>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ROOM_COLUMNS} FROM rooms \
             WHERE is_active AND participants @> jsonb_build_array(jsonb_build_object('userId', $1::text)) \
             ORDER BY updated_at DESC, name ASC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(room_from_row).collect()
    }

    async fn update_last_message(&self, id: Uuid, last: LastMessage) -> Result<(), StoreError> {
        sqlx::query("UPDATE rooms SET last_message = $2, updated_at = GREATEST(updated_at, $3) WHERE id = $1")
            .bind(id)
            .bind(Json(&last))
            .bind(last.timestamp)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// =============================================================================
// USERS
// =============================================================================

#[async_trait::async_trait]
impl UserDirectory for PgStore {
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query_as::<_, (String, String)>("SELECT id, name FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(id, name)| User { id, name }))
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO users (id, name) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name")
            .bind(&user.id)
            .bind(&user.name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<User>, StoreError> {
        let pattern = format!("%{}%", escape_like(query));
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT id, name FROM users WHERE name ILIKE $1 OR id ILIKE $1 ORDER BY name, id LIMIT $2",
        )
        .bind(pattern)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id, name)| User { id, name }).collect())
    }
}

/// Escape `LIKE` wildcards so user input matches literally.
fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
#[path = "postgres_test.rs"]
mod tests;
