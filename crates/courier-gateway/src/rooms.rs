use std::collections::{HashMap, HashSet};
use std::fmt;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use courier_types::events::ServerEvent;

use crate::presence::{ConnId, PresenceRegistry};

/// A named broadcast group. Conversation rooms are shared and joined
/// explicitly; every connection is auto-joined to its owner's personal room
/// for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    Conversation(Uuid),
    User(Uuid),
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conversation(id) => write!(f, "conversation:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
        }
    }
}

/// Routes outbound events to room members.
///
/// Owns the per-connection delivery channels and the membership tables.
/// Membership is connection-scoped: a reconnecting client starts with only
/// its personal room and must re-join conversations.
#[derive(Default)]
pub struct RoomRouter {
    senders: RwLock<HashMap<ConnId, mpsc::UnboundedSender<ServerEvent>>>,
    rooms: RwLock<HashMap<RoomId, HashSet<ConnId>>>,
}

impl RoomRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a delivery channel for a new connection.
    pub async fn register_connection(
        &self,
        conn_id: ConnId,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) {
        self.senders.write().await.insert(conn_id, sender);
    }

    /// Drop the delivery channel and leave every room. Called synchronously
    /// on disconnect so later broadcasts cannot target the dead handle.
    pub async fn unregister_connection(&self, conn_id: ConnId) {
        self.senders.write().await.remove(&conn_id);
        self.leave_all(conn_id).await;
    }

    /// Remove a connection from every room it is a member of.
    pub async fn leave_all(&self, conn_id: ConnId) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, members| {
            members.remove(&conn_id);
            !members.is_empty()
        });
    }

    /// Idempotent join.
    pub async fn join(&self, conn_id: ConnId, room: RoomId) {
        self.rooms.write().await.entry(room).or_default().insert(conn_id);
    }

    /// Idempotent leave. Empty rooms are dropped from the table.
    pub async fn leave(&self, conn_id: ConnId, room: RoomId) {
        let mut rooms = self.rooms.write().await;
        if let Some(members) = rooms.get_mut(&room) {
            members.remove(&conn_id);
            if members.is_empty() {
                rooms.remove(&room);
            }
        }
    }

    pub async fn is_member(&self, conn_id: ConnId, room: RoomId) -> bool {
        self.rooms
            .read()
            .await
            .get(&room)
            .is_some_and(|members| members.contains(&conn_id))
    }

    /// Deliver an event to every member of a room, optionally skipping the
    /// originating connection. Sends to handles that died mid-flight are
    /// no-ops. Returns the number of deliveries attempted.
    pub async fn broadcast(
        &self,
        room: RoomId,
        event: &ServerEvent,
        exclude: Option<ConnId>,
    ) -> usize {
        let rooms = self.rooms.read().await;
        let Some(members) = rooms.get(&room) else {
            return 0;
        };
        let senders = self.senders.read().await;

        let mut delivered = 0;
        for conn_id in members {
            if Some(*conn_id) == exclude {
                continue;
            }
            if let Some(tx) = senders.get(conn_id) {
                let _ = tx.send(event.clone());
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver an event to every live connection of one user, resolved
    /// through the presence registry. Returns the number of deliveries; zero
    /// means the recipient has no live connection.
    pub async fn unicast(
        &self,
        presence: &PresenceRegistry,
        user_id: Uuid,
        event: &ServerEvent,
    ) -> usize {
        let conns = presence.lookup(user_id).await;
        if conns.is_empty() {
            return 0;
        }
        let senders = self.senders.read().await;

        let mut delivered = 0;
        for conn_id in conns {
            if let Some(tx) = senders.get(&conn_id) {
                let _ = tx.send(event.clone());
                delivered += 1;
            }
        }
        delivered
    }
}
