use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, Group, Message, MessageKind, ReactionAction};

/// Events sent FROM client TO server over the gateway.
///
/// Unknown tags and type-mismatched payloads fail serde deserialization and
/// are dropped by the connection loop with a logged diagnostic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Authenticate the WebSocket connection. Must be the first frame.
    Authenticate { token: String },

    /// Enter a conversation room. Membership is connection-scoped; a
    /// reconnecting client must join again.
    JoinConversation { conversation_id: Uuid },

    /// Leave a conversation room. No-op if not a member.
    LeaveConversation { conversation_id: Uuid },

    /// Deliver an already-persisted message to the conversation room.
    SendMessage {
        conversation_id: Uuid,
        sender_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        receiver_id: Option<Uuid>,
        message: String,
        kind: MessageKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<Attachment>,
        /// Server-assigned id from the durable write that preceded this emit.
        message_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<String>,
    },

    /// Typing indicator. Ephemeral; expiry is the sender's concern.
    Typing { conversation_id: Uuid, is_typing: bool },

    /// Broadcast a profile status change to everyone.
    UpdateStatus { status: String },

    /// Relay a deletion notice to the conversation room. Ownership
    /// authorization happened at the CRUD layer.
    DeleteMessage { message_id: Uuid, conversation_id: Uuid },

    /// Add or remove a reaction, then sync the room.
    MessageReaction {
        message_id: Uuid,
        conversation_id: Uuid,
        emoji: String,
        action: ReactionAction,
    },

    GroupCreated { group: Group },
    GroupUpdated { group: Group },
    MemberAdded { group: Group, member_id: Uuid },
    MemberRemoved { group: Group, member_id: Uuid },
    GroupDeleted { group_id: Uuid, participant_ids: Vec<Uuid> },
    AdminRoleChanged { group: Group, member_id: Uuid, is_admin: bool },
}

/// Events sent FROM server TO clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Server confirms successful authentication.
    Ready { user_id: Uuid, username: String },

    /// A message was posted to a conversation the connection has joined.
    ReceiveMessage { message: Message },

    /// A user started or stopped typing in a conversation.
    UserTyping {
        conversation_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },

    /// A user changed their profile status.
    UserStatusUpdate { user_id: Uuid, status: String },

    /// A message was deleted.
    MessageDeleted {
        message_id: Uuid,
        conversation_id: Uuid,
        deleted_by: Uuid,
    },

    /// A reaction was added or removed. Sent to the full room, actor
    /// included, so every client converges on the canonical reaction set.
    MessageReaction {
        message_id: Uuid,
        conversation_id: Uuid,
        user_id: Uuid,
        emoji: String,
        action: ReactionAction,
    },

    NewGroup { group: Group },
    GroupUpdate { group: Group },
    MemberAdded { group: Group, member_id: Uuid },
    MemberRemoved { group: Group, member_id: Uuid },
    GroupDeleted { group_id: Uuid },
    AdminRoleChanged { group: Group, member_id: Uuid, is_admin: bool },

    /// A user's first connection arrived.
    UserOnline { user_id: Uuid },

    /// A user's last connection went away.
    UserOffline { user_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_events_use_camel_case_tags() {
        let raw = r#"{"type":"joinConversation","data":{"conversationId":"7f0c0f6e-2f6a-4a52-9f21-111111111111"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(event, ClientEvent::JoinConversation { .. }));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let raw = r#"{"type":"becomeAdmin","data":{}}"#;
        assert!(serde_json::from_str::<ClientEvent>(raw).is_err());
    }

    #[test]
    fn reaction_action_round_trips_lowercase() {
        let raw = r#"{"type":"messageReaction","data":{
            "messageId":"7f0c0f6e-2f6a-4a52-9f21-111111111111",
            "conversationId":"7f0c0f6e-2f6a-4a52-9f21-222222222222",
            "emoji":"👍","action":"add"}}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::MessageReaction { action, emoji, .. } => {
                assert_eq!(action, ReactionAction::Add);
                assert_eq!(emoji, "👍");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
