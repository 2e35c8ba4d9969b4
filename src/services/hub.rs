//! Hub: live connections and room broadcast groups.
//!
//! DESIGN
//! ======
//! Every connection registers its outbound sender here on open and is
//! removed on close. Identified connections are also tagged with their user
//! id so personal traffic reaches every tab a user has open, including tabs
//! that lost the presence slot to a newer one.
//!
//! Delivery never blocks: frames go out with `try_send`. A closed channel
//! drops the frame. A full channel means the client is not keeping up, so
//! the connection is evicted from the hub and its socket loop is signalled
//! to close. The client reloads history when it reconnects.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Notify, RwLock, mpsc};
use tracing::warn;
use uuid::Uuid;

use crate::frame::Frame;

/// Outbound side of one client socket.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: Uuid,
    pub tx: mpsc::Sender<Frame>,
    /// Signalled once when the hub evicts this connection.
    pub evicted: Arc<Notify>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { conn_id: Uuid::new_v4(), tx, evicted: Arc::new(Notify::new()) }
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.conn_id == other.conn_id
    }
}

impl Eq for ConnectionHandle {}

/// Who receives a frame.
#[derive(Debug, Clone, Copy)]
pub enum Audience<'a> {
    Everyone,
    Room(Uuid),
    User(&'a str),
    Connection(Uuid),
}

struct ClientEntry {
    tx: mpsc::Sender<Frame>,
    evicted: Arc<Notify>,
    user_id: Option<String>,
}

#[derive(Default)]
struct HubInner {
    clients: HashMap<Uuid, ClientEntry>,
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

impl HubInner {
    fn remove_client(&mut self, conn_id: Uuid) -> Option<ClientEntry> {
        let entry = self.clients.remove(&conn_id)?;
        self.rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
        Some(entry)
    }
}

#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<RwLock<HubInner>>,
}

impl Hub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, handle: &ConnectionHandle) {
        let mut inner = self.inner.write().await;
        inner.clients.insert(
            handle.conn_id,
            ClientEntry { tx: handle.tx.clone(), evicted: Arc::clone(&handle.evicted), user_id: None },
        );
    }

    pub async fn bind_user(&self, conn_id: Uuid, user_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.clients.get_mut(&conn_id) {
            entry.user_id = Some(user_id.to_string());
        }
    }

    /// Drop a connection and all of its room subscriptions.
    pub async fn unregister(&self, conn_id: Uuid) {
        self.inner.write().await.remove_client(conn_id);
    }

    /// Drop a connection that cannot keep up and tell its socket loop.
    async fn evict(&self, conn_id: Uuid) {
        let entry = self.inner.write().await.remove_client(conn_id);
        if let Some(entry) = entry {
            warn!(%conn_id, "hub: outbound channel full; connection evicted");
            entry.evicted.notify_one();
        }
    }

    pub async fn subscribe(&self, conn_id: Uuid, room_id: Uuid) {
        let mut inner = self.inner.write().await;
        if !inner.clients.contains_key(&conn_id) {
            return;
        }
        inner.rooms.entry(room_id).or_default().insert(conn_id);
    }

    /// Subscribe every live connection of the given users. Returns how many
    /// connections joined.
    pub async fn subscribe_users(&self, user_ids: &[String], room_id: Uuid) -> usize {
        let mut inner = self.inner.write().await;
        let conns: Vec<Uuid> = inner
            .clients
            .iter()
            .filter(|(_, entry)| entry.user_id.as_ref().is_some_and(|u| user_ids.contains(u)))
            .map(|(conn_id, _)| *conn_id)
            .collect();
        let members = inner.rooms.entry(room_id).or_default();
        conns.into_iter().filter(|conn_id| members.insert(*conn_id)).count()
    }

    pub async fn is_subscribed(&self, conn_id: Uuid, room_id: Uuid) -> bool {
        let inner = self.inner.read().await;
        inner
            .rooms
            .get(&room_id)
            .is_some_and(|members| members.contains(&conn_id))
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    /// Queue `frame` for every connection in `audience`. Returns the number
    /// of connections it was queued for. Connections whose channel is full
    /// are evicted.
    pub async fn deliver(&self, audience: Audience<'_>, frame: &Frame) -> usize {
        let inner = self.inner.read().await;
        let targets: Vec<(Uuid, &mpsc::Sender<Frame>)> = match audience {
            Audience::Everyone => inner.clients.iter().map(|(id, e)| (*id, &e.tx)).collect(),
            Audience::Room(room_id) => inner
                .rooms
                .get(&room_id)
                .into_iter()
                .flatten()
                .filter_map(|id| inner.clients.get(id).map(|e| (*id, &e.tx)))
                .collect(),
            Audience::User(user_id) => inner
                .clients
                .iter()
                .filter(|(_, e)| e.user_id.as_deref() == Some(user_id))
                .map(|(id, e)| (*id, &e.tx))
                .collect(),
            Audience::Connection(conn_id) => inner
                .clients
                .get(&conn_id)
                .map(|e| (conn_id, &e.tx))
                .into_iter()
                .collect(),
        };

        let mut delivered = 0;
        let mut overflowed = Vec::new();
        for (conn_id, tx) in targets {
            match tx.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%conn_id, event = %frame.event, "hub: outbound channel full; frame dropped");
                    overflowed.push(conn_id);
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        drop(inner);

        for conn_id in overflowed {
            self.evict(conn_id).await;
        }
        delivered
    }
}

#[cfg(test)]
#[path = "hub_test.rs"]
mod tests;
