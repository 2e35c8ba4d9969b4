//! In-memory store for development and tests.
//!
//! One mutex per collection. Messages are kept in append order, which is
//! also timestamp order because appends take the clock under the lock.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

use super::{MessageStore, MonotonicClock, RoomDirectory, StoreError, User, UserDirectory};
use crate::services::message::{Message, MessageScope, NewMessage};
use crate::services::room::{LastMessage, NewRoom, Room};

#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: Mutex<Vec<Message>>,
    rooms: Mutex<HashMap<Uuid, Room>>,
    users: Mutex<HashMap<String, User>>,
    clock: MonotonicClock,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>, StoreError> {
    mutex
        .lock()
        .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
}

#[async_trait::async_trait]
impl MessageStore for MemoryStore {
    async fn append(&self, msg: NewMessage) -> Result<Message, StoreError> {
        let mut messages = lock(&self.messages)?;
        let stored = msg.into_message(Uuid::new_v4(), self.clock.now());
        messages.push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Message>, StoreError> {
        let messages = lock(&self.messages)?;
        Ok(messages.iter().find(|m| m.id == id).cloned())
    }

    async fn set_reaction(&self, id: Uuid, user_id: &str, emoji: &str) -> Result<Option<Message>, StoreError> {
        let mut messages = lock(&self.messages)?;
        let Some(msg) = messages.iter_mut().find(|m| m.id == id) else {
            return Ok(None);
        };
        msg.apply_reaction(user_id, emoji);
        Ok(Some(msg.clone()))
    }

    async fn mark_read(&self, id: Uuid, user_id: &str, read_at: i64) -> Result<bool, StoreError> {
        let mut messages = lock(&self.messages)?;
        let Some(msg) = messages.iter_mut().find(|m| m.id == id) else {
            return Ok(false);
        };
        msg.mark_read(user_id, read_at);
        Ok(true)
    }

    async fn recent(&self, scope: &MessageScope, before: Option<i64>, limit: usize) -> Result<Vec<Message>, StoreError> {
        let messages = lock(&self.messages)?;
        let in_scope: HashSet<Uuid> = messages
            .iter()
            .filter(|m| scope.matches(m))
            .map(|m| m.id)
            .collect();
        let answered: HashMap<Uuid, &Message> = messages
            .iter()
            .filter(|m| matches!(scope, MessageScope::Assistant { .. }) && in_scope.contains(&m.id))
            .map(|m| (m.id, m))
            .collect();
        let mut page: Vec<Message> = messages
            .iter()
            .rev()
            .filter(|m| before.is_none_or(|b| m.timestamp < b))
            .filter(|m| {
                in_scope.contains(&m.id)
                    || m.reply_to
                        .and_then(|q| answered.get(&q))
                        .is_some_and(|question| scope.answers(m, question))
            })
            .take(limit)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }
}

#[async_trait::async_trait]
impl RoomDirectory for MemoryStore {
    async fn create(&self, room: NewRoom) -> Result<Room, StoreError> {
        let room = room.into_room(Uuid::new_v4(), self.clock.now());
        lock(&self.rooms)?.insert(room.id, room.clone());
        Ok(room)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Room>, StoreError> {
        Ok(lock(&self.rooms)?.get(&id).cloned())
    }

    async fn rooms_for_user(&self, user_id: &str) -> Result<Vec<Room>, StoreError> {
        let rooms = lock(&self.rooms)?;
        let mut out: Vec<Room> = rooms
            .values()
            .filter(|r| r.is_active && r.is_participant(user_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.name.cmp(&b.name)));
        Ok(out)
    }

    async fn update_last_message(&self, id: Uuid, last: LastMessage) -> Result<(), StoreError> {
        let mut rooms = lock(&self.rooms)?;
        if let Some(room) = rooms.get_mut(&id) {
            room.updated_at = room.updated_at.max(last.timestamp);
            room.last_message = Some(last);
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl UserDirectory for MemoryStore {
    async fn find_user(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(lock(&self.users)?.get(id).cloned())
    }

    async fn upsert_user(&self, user: User) -> Result<(), StoreError> {
        lock(&self.users)?.insert(user.id.clone(), user);
        Ok(())
    }

    async fn search_users(&self, query: &str, limit: usize) -> Result<Vec<User>, StoreError> {
        let needle = query.to_lowercase();
        let users = lock(&self.users)?;
        let mut found: Vec<User> = users
            .values()
            .filter(|u| u.name.to_lowercase().contains(&needle) || u.id.to_lowercase().contains(&needle))
            .cloned()
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        found.truncate(limit);
        Ok(found)
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
