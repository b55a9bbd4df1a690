use uuid::Uuid;

use courier_types::models::{Notification, NotificationKind};

/// Persistence seam for side effects triggered by socket events.
///
/// Implementations are blocking; the dispatcher calls them through
/// `tokio::task::spawn_blocking`. Failures are logged and swallowed by the
/// caller; a failed write never rolls back a broadcast.
pub trait SideEffectStore: Send + Sync {
    /// Insert `(message_id, user_id, emoji)` if absent. Returns true when a
    /// row was inserted; replaying the same add is a no-op.
    fn upsert_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str)
    -> anyhow::Result<bool>;

    /// Delete the matching row if present. Returns true when a row existed.
    fn remove_reaction(&self, message_id: Uuid, user_id: Uuid, emoji: &str)
    -> anyhow::Result<bool>;

    fn create_notification(&self, notification: &Notification) -> anyhow::Result<()>;
}

fn kind_str(kind: NotificationKind) -> &'static str {
    match kind {
        NotificationKind::Message => "message",
        NotificationKind::Group => "group",
    }
}

impl SideEffectStore for courier_db::Database {
    fn upsert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> anyhow::Result<bool> {
        self.upsert_reaction(
            &Uuid::new_v4().to_string(),
            &message_id.to_string(),
            &user_id.to_string(),
            emoji,
        )
    }

    fn remove_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> anyhow::Result<bool> {
        self.remove_reaction(&message_id.to_string(), &user_id.to_string(), emoji)
    }

    fn create_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        self.create_notification(
            &notification.id.to_string(),
            kind_str(notification.kind),
            &notification.sender_id.to_string(),
            &notification.receiver_id.to_string(),
            &notification.metadata.to_string(),
        )
    }
}
