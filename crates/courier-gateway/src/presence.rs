use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use uuid::Uuid;

/// Unique identifier for one live transport session.
///
/// Minted when a connection authenticates, destroyed on disconnect. A user
/// may own any number of these at once (multi-device).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl ConnId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// In-memory map of user identity to live connection handles.
///
/// Invariant: an entry exists iff the identity has at least one live
/// connection. Mutations are serialized by the write lock, so a connect
/// racing a disconnect for the same user cannot lose either update.
#[derive(Default)]
pub struct PresenceRegistry {
    entries: RwLock<HashMap<Uuid, HashSet<ConnId>>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection for `user_id`. Returns true if this was the user's
    /// first live connection; the caller broadcasts "online" exactly then.
    pub async fn register(&self, user_id: Uuid, conn_id: ConnId) -> bool {
        let mut entries = self.entries.write().await;
        let conns = entries.entry(user_id).or_default();
        let was_offline = conns.is_empty();
        conns.insert(conn_id);
        was_offline
    }

    /// Remove a connection. Returns true if the user's connection set became
    /// empty: the entry is deleted and the caller broadcasts "offline".
    /// A second unregister for the same pair returns false, which keeps the
    /// offline broadcast to exactly once.
    pub async fn unregister(&self, user_id: Uuid, conn_id: ConnId) -> bool {
        let mut entries = self.entries.write().await;
        match entries.get_mut(&user_id) {
            Some(conns) => {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    entries.remove(&user_id);
                    true
                } else {
                    false
                }
            }
            None => false,
        }
    }

    /// Snapshot of a user's live connections. Empty when offline.
    pub async fn lookup(&self, user_id: Uuid) -> Vec<ConnId> {
        self.entries
            .read()
            .await
            .get(&user_id)
            .map(|conns| conns.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of everyone currently online.
    pub async fn online_identities(&self) -> Vec<Uuid> {
        self.entries.read().await.keys().copied().collect()
    }
}
