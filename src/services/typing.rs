//! Typing aggregator: per-room sets of users currently typing.
//!
//! Direct typing is never stored; the router forwards it as a one-shot
//! `typing:show` / `typing:hide`. Room entries clear on explicit stop, on
//! disconnect, or through the optional expiry sweeper.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::hub::Audience;
use crate::frame::Frame;
use crate::state::AppState;

pub const TYPING_UPDATE_EVENT: &str = "typing:update";

/// Payload of `typing:update`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    pub room_id: Uuid,
    pub users: Vec<String>,
}

impl TypingUpdate {
    #[must_use]
    pub fn frame(&self) -> Frame {
        Frame::from_value(TYPING_UPDATE_EVENT, self)
    }
}

#[derive(Clone, Default)]
pub struct TypingAggregator {
    rooms: Arc<Mutex<HashMap<Uuid, HashMap<String, Instant>>>>,
}

impl TypingAggregator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, HashMap<String, Instant>>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `user_id` typing in `room_id` and return the room's set.
    pub fn start(&self, room_id: Uuid, user_id: &str) -> TypingUpdate {
        let mut rooms = self.lock();
        let typing = rooms.entry(room_id).or_default();
        typing.insert(user_id.to_string(), Instant::now());
        TypingUpdate { room_id, users: sorted_users(typing) }
    }

    /// Clear `user_id` in `room_id`. `None` when nobody was typing there.
    pub fn stop(&self, room_id: Uuid, user_id: &str) -> Option<TypingUpdate> {
        let mut rooms = self.lock();
        let typing = rooms.get_mut(&room_id)?;
        typing.remove(user_id);
        let update = TypingUpdate { room_id, users: sorted_users(typing) };
        if typing.is_empty() {
            rooms.remove(&room_id);
        }
        Some(update)
    }

    /// Clear `user_id` everywhere, returning one update per affected room.
    pub fn remove_user(&self, user_id: &str) -> Vec<TypingUpdate> {
        self.retain(|user, _| user != user_id)
    }

    /// Clear entries older than `ttl`, returning one update per affected room.
    pub fn sweep_expired(&self, ttl: Duration) -> Vec<TypingUpdate> {
        let now = Instant::now();
        self.retain(|_, since| now.duration_since(*since) < ttl)
    }

    #[cfg(test)]
    pub fn users_in(&self, room_id: Uuid) -> Vec<String> {
        self.lock().get(&room_id).map(sorted_users).unwrap_or_default()
    }

    fn retain(&self, keep: impl Fn(&str, &Instant) -> bool) -> Vec<TypingUpdate> {
        let mut rooms = self.lock();
        let mut updates = Vec::new();
        rooms.retain(|room_id, typing| {
            let before = typing.len();
            typing.retain(|user, since| keep(user, since));
            if typing.len() != before {
                updates.push(TypingUpdate { room_id: *room_id, users: sorted_users(typing) });
            }
            !typing.is_empty()
        });
        updates
    }
}

fn sorted_users(typing: &HashMap<String, Instant>) -> Vec<String> {
    let mut users: Vec<String> = typing.keys().cloned().collect();
    users.sort();
    users
}

/// Spawn the expiry sweeper. Runs every half `ttl`, at least once a second.
pub fn spawn_typing_sweeper(state: AppState, ttl: Duration) -> JoinHandle<()> {
    let period = (ttl / 2).max(Duration::from_secs(1));
    info!(ttl_secs = ttl.as_secs(), "typing expiry sweeper configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for update in state.typing.sweep_expired(ttl) {
                debug!(room_id = %update.room_id, remaining = update.users.len(), "typing entries expired");
                state
                    .hub
                    .deliver(Audience::Room(update.room_id), &update.frame())
                    .await;
            }
        }
    })
}

#[cfg(test)]
#[path = "typing_test.rs"]
mod tests;
