use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use courier_types::events::ServerEvent;
use courier_types::models::{Attachment, Message, MessageKind, ReactionAction};

/// Two deliveries of the "same" message without matching ids are merged when
/// sender and content match and the timestamps fall within this window.
/// Best-effort guard: two genuinely identical messages sent inside the
/// window will be misclassified as one.
const DUPLICATE_WINDOW_SECS: i64 = 5;

/// A not-yet-acknowledged message, visible to the sending user only.
#[derive(Debug, Clone)]
pub struct PendingMessage {
    pub temp_id: String,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
}

/// Canonical local state for one conversation: the confirmed message list,
/// the in-flight optimistic sends, and per-message reaction sets.
#[derive(Debug, Default)]
pub struct ConversationView {
    confirmed: Vec<Message>,
    pending: Vec<PendingMessage>,
    /// message id -> emoji -> reacting users
    reactions: HashMap<Uuid, HashMap<String, HashSet<Uuid>>>,
}

impl ConversationView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an optimistic message and return its temp id. The "temp-"
    /// prefix guarantees it can never collide with a server-assigned UUID.
    pub fn begin_send(
        &mut self,
        sender_id: Uuid,
        content: String,
        kind: MessageKind,
        attachment: Option<Attachment>,
    ) -> String {
        let temp_id = format!("temp-{}", Uuid::new_v4());
        self.pending.push(PendingMessage {
            temp_id: temp_id.clone(),
            sender_id,
            content,
            kind,
            attachment,
            created_at: Utc::now(),
        });
        temp_id
    }

    /// Durable write acknowledged: swap the optimistic entry for the
    /// canonical message. If the broadcast copy already landed (matched by
    /// server id), the pending entry is simply dropped.
    pub fn confirm_send(&mut self, temp_id: &str, mut message: Message) {
        self.pending.retain(|p| p.temp_id != temp_id);

        if self.confirmed.iter().any(|m| m.id == message.id) {
            return;
        }
        message.temp_id = Some(temp_id.to_string());
        self.confirmed.push(message);
    }

    /// Durable write failed: drop the optimistic entry and hand the draft
    /// back so the client can restore the user's input.
    pub fn fail_send(&mut self, temp_id: &str) -> Option<String> {
        let index = self.pending.iter().position(|p| p.temp_id == temp_id)?;
        Some(self.pending.remove(index).content)
    }

    /// Merge one server-pushed event. Returns true if it changed the view.
    pub fn apply_event(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::ReceiveMessage { message } => self.apply_message(message.clone()),
            ServerEvent::MessageReaction {
                message_id,
                user_id,
                emoji,
                action,
                ..
            } => self.apply_reaction(*message_id, *user_id, emoji, *action),
            ServerEvent::MessageDeleted { message_id, .. } => {
                let before = self.confirmed.len();
                self.confirmed.retain(|m| m.id != *message_id);
                self.reactions.remove(message_id);
                self.confirmed.len() != before
            }
            _ => false,
        }
    }

    /// Append a pushed message unless it duplicates something already held.
    /// Detection order: exact server id, exact temp id, then the
    /// sender/content/time-window heuristic. Duplicates are dropped
    /// silently.
    pub fn apply_message(&mut self, message: Message) -> bool {
        if self.confirmed.iter().any(|m| m.id == message.id) {
            return false;
        }

        if let Some(temp_id) = message.temp_id.as_deref() {
            if self.pending.iter().any(|p| p.temp_id == temp_id) {
                // Echo of our own in-flight send; the ack will promote it.
                return false;
            }
            if self
                .confirmed
                .iter()
                .any(|m| m.temp_id.as_deref() == Some(temp_id))
            {
                return false;
            }
        }

        if self.matches_heuristic(&message) {
            return false;
        }

        self.confirmed.push(message);
        true
    }

    fn matches_heuristic(&self, message: &Message) -> bool {
        let window = Duration::seconds(DUPLICATE_WINDOW_SECS);

        let near = |at: DateTime<Utc>| (at - message.created_at).abs() <= window;

        self.confirmed
            .iter()
            .any(|m| m.sender_id == message.sender_id && m.content == message.content && near(m.created_at))
            || self
                .pending
                .iter()
                .any(|p| p.sender_id == message.sender_id && p.content == message.content && near(p.created_at))
    }

    /// Toggle reaction set membership driven by the explicit action. Two
    /// `add` events from different devices must not cancel out, so this is
    /// never a blind toggle. Returns true if membership changed.
    pub fn apply_reaction(
        &mut self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
        action: ReactionAction,
    ) -> bool {
        match action {
            ReactionAction::Add => self
                .reactions
                .entry(message_id)
                .or_default()
                .entry(emoji.to_string())
                .or_default()
                .insert(user_id),
            ReactionAction::Remove => {
                let Some(per_message) = self.reactions.get_mut(&message_id) else {
                    return false;
                };
                let Some(users) = per_message.get_mut(emoji) else {
                    return false;
                };
                let removed = users.remove(&user_id);
                if users.is_empty() {
                    per_message.remove(emoji);
                }
                if per_message.is_empty() {
                    self.reactions.remove(&message_id);
                }
                removed
            }
        }
    }

    pub fn confirmed(&self) -> &[Message] {
        &self.confirmed
    }

    pub fn pending(&self) -> &[PendingMessage] {
        &self.pending
    }

    /// Users currently reacting to a message with a given emoji.
    pub fn reactors(&self, message_id: Uuid, emoji: &str) -> Option<&HashSet<Uuid>> {
        self.reactions.get(&message_id)?.get(emoji)
    }
}
