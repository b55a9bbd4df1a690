/// Database row types. These map directly to SQLite rows.
/// Distinct from courier-types wire models to keep the DB layer independent.

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub kind: String,
    pub attachment: Option<String>,
    pub created_at: String,
}

pub struct ReactionRow {
    pub id: String,
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
    pub created_at: String,
}

pub struct NotificationRow {
    pub id: String,
    pub kind: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub is_read: bool,
    pub metadata: String,
    pub created_at: String,
}
