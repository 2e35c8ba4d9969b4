//! Presence registry: who is online, and through which connection.
//!
//! Last writer wins: a second `user:online` for the same id replaces the
//! recorded handle without closing the older socket. Removal is keyed by
//! handle so a superseded connection closing never evicts its successor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::hub::ConnectionHandle;
use crate::frame::now_ms;

struct PresenceEntry {
    handle: ConnectionHandle,
    name: String,
    last_seen: i64,
}

/// One row of the `users:online` snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    pub id: String,
    pub name: String,
    pub last_seen: i64,
}

#[derive(Clone, Default)]
pub struct PresenceRegistry {
    inner: Arc<Mutex<HashMap<String, PresenceEntry>>>,
}

impl PresenceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PresenceEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record or overwrite `user_id`, returning the new snapshot.
    pub fn set_online(&self, user_id: &str, name: &str, handle: ConnectionHandle) -> Vec<OnlineUser> {
        let mut entries = self.lock();
        entries.insert(user_id.to_string(), PresenceEntry { handle, name: name.to_string(), last_seen: now_ms() });
        snapshot_of(&entries)
    }

    /// Remove the entry recorded for `handle`. `None` when the handle is
    /// stale or was never identified.
    pub fn remove(&self, handle: &ConnectionHandle) -> Option<String> {
        let mut entries = self.lock();
        let user_id = entries
            .iter()
            .find(|(_, entry)| entry.handle == *handle)
            .map(|(user_id, _)| user_id.clone())?;
        entries.remove(&user_id);
        Some(user_id)
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<OnlineUser> {
        snapshot_of(&self.lock())
    }

    #[must_use]
    pub fn is_online(&self, user_id: &str) -> bool {
        self.lock().contains_key(user_id)
    }
}

fn snapshot_of(entries: &HashMap<String, PresenceEntry>) -> Vec<OnlineUser> {
    let mut users: Vec<OnlineUser> = entries
        .iter()
        .map(|(id, entry)| OnlineUser { id: id.clone(), name: entry.name.clone(), last_seen: entry.last_seen })
        .collect();
    users.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
    users
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
