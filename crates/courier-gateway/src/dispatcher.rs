use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use courier_types::events::{ClientEvent, ServerEvent};
use courier_types::models::{Message, Notification, NotificationKind, ReactionAction};

use crate::error::GatewayError;
use crate::presence::{ConnId, PresenceRegistry};
use crate::rooms::{RoomId, RoomRouter};
use crate::store::SideEffectStore;

/// Global broadcast channel capacity. A receiver that lags past this logs
/// and continues; it is not disconnected.
const BROADCAST_CAPACITY: usize = 1024;

/// Routes inbound client events to their side-effect handlers and outbound
/// delivery. One instance per server process; cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Global events (presence, status); every connection receives these.
    broadcast_tx: broadcast::Sender<ServerEvent>,
    presence: PresenceRegistry,
    rooms: RoomRouter,
    store: Arc<dyn SideEffectStore>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn SideEffectStore>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                presence: PresenceRegistry::new(),
                rooms: RoomRouter::new(),
                store,
            }),
        }
    }

    /// Subscribe to global events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<ServerEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Broadcast an event to every connected client.
    pub fn broadcast_global(&self, event: ServerEvent) {
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub fn rooms(&self) -> &RoomRouter {
        &self.inner.rooms
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.inner.presence
    }

    /// Register an authenticated connection: delivery channel, personal room,
    /// presence entry. Broadcasts "online" only for the user's first
    /// connection.
    pub async fn connect(&self, user_id: Uuid) -> (ConnId, mpsc::UnboundedReceiver<ServerEvent>) {
        let conn_id = ConnId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        self.inner.rooms.register_connection(conn_id, tx).await;
        self.inner.rooms.join(conn_id, RoomId::User(user_id)).await;

        if self.inner.presence.register(user_id, conn_id).await {
            self.broadcast_global(ServerEvent::UserOnline { user_id });
        }

        (conn_id, rx)
    }

    /// Tear down a connection: leave every room, drop the delivery channel,
    /// remove the presence entry. Broadcasts "offline" only when the user's
    /// last connection went away. Runs before the connection handler
    /// returns, so no later event can be attributed to the dead handle.
    pub async fn disconnect(&self, user_id: Uuid, conn_id: ConnId) {
        self.inner.rooms.unregister_connection(conn_id).await;

        if self.inner.presence.unregister(user_id, conn_id).await {
            self.broadcast_global(ServerEvent::UserOffline { user_id });
        }
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.presence.online_identities().await
    }

    /// Process one inbound event for an Active connection.
    ///
    /// Called sequentially from the connection's receive loop, which is what
    /// preserves per-connection ordering. A `Validation` error means the
    /// event was dropped without side effects; the connection stays up.
    pub async fn dispatch(
        &self,
        user_id: Uuid,
        conn_id: ConnId,
        event: ClientEvent,
    ) -> Result<(), GatewayError> {
        match event {
            // The handshake consumed the real one; a repeat is a no-op.
            ClientEvent::Authenticate { .. } => Ok(()),

            ClientEvent::JoinConversation { conversation_id } => {
                self.inner
                    .rooms
                    .join(conn_id, RoomId::Conversation(conversation_id))
                    .await;
                debug!("{conn_id} joined conversation:{conversation_id}");
                Ok(())
            }

            ClientEvent::LeaveConversation { conversation_id } => {
                self.inner
                    .rooms
                    .leave(conn_id, RoomId::Conversation(conversation_id))
                    .await;
                debug!("{conn_id} left conversation:{conversation_id}");
                Ok(())
            }

            ClientEvent::SendMessage {
                conversation_id,
                sender_id,
                receiver_id,
                message,
                kind,
                attachment,
                message_id,
                temp_id,
            } => {
                if sender_id != user_id {
                    return Err(GatewayError::Validation(
                        "senderId does not match the authenticated identity".into(),
                    ));
                }
                if message.trim().is_empty() && attachment.is_none() {
                    return Err(GatewayError::Validation(
                        "sendMessage needs content or an attachment".into(),
                    ));
                }

                let payload = Message {
                    id: message_id,
                    conversation_id,
                    sender_id,
                    content: message,
                    kind,
                    created_at: Utc::now(),
                    attachment,
                    temp_id,
                };

                // One room broadcast, origin excluded. The sender's
                // reconciliation layer already holds the optimistic copy;
                // its other devices are room members and still receive it.
                self.inner
                    .rooms
                    .broadcast(
                        RoomId::Conversation(conversation_id),
                        &ServerEvent::ReceiveMessage { message: payload },
                        Some(conn_id),
                    )
                    .await;

                // Notification is fire-and-forget: its failure never blocks
                // or unwinds the delivery above.
                if let Some(receiver_id) = receiver_id.filter(|r| *r != sender_id) {
                    self.spawn_notification(Notification {
                        id: Uuid::new_v4(),
                        kind: NotificationKind::Message,
                        sender_id,
                        receiver_id,
                        is_read: false,
                        metadata: serde_json::json!({
                            "conversationId": conversation_id,
                            "messageId": message_id,
                        }),
                        created_at: Utc::now(),
                    });
                }
                Ok(())
            }

            ClientEvent::Typing {
                conversation_id,
                is_typing,
            } => {
                self.inner
                    .rooms
                    .broadcast(
                        RoomId::Conversation(conversation_id),
                        &ServerEvent::UserTyping {
                            conversation_id,
                            user_id,
                            is_typing,
                        },
                        Some(conn_id),
                    )
                    .await;
                Ok(())
            }

            ClientEvent::UpdateStatus { status } => {
                self.broadcast_global(ServerEvent::UserStatusUpdate { user_id, status });
                Ok(())
            }

            ClientEvent::DeleteMessage {
                message_id,
                conversation_id,
            } => {
                self.inner
                    .rooms
                    .broadcast(
                        RoomId::Conversation(conversation_id),
                        &ServerEvent::MessageDeleted {
                            message_id,
                            conversation_id,
                            deleted_by: user_id,
                        },
                        None,
                    )
                    .await;
                Ok(())
            }

            ClientEvent::MessageReaction {
                message_id,
                conversation_id,
                emoji,
                action,
            } => {
                self.persist_reaction(message_id, user_id, emoji.clone(), action)
                    .await;

                // Full room, actor included: every client converges on the
                // persisted set from the same broadcast.
                self.inner
                    .rooms
                    .broadcast(
                        RoomId::Conversation(conversation_id),
                        &ServerEvent::MessageReaction {
                            message_id,
                            conversation_id,
                            user_id,
                            emoji,
                            action,
                        },
                        None,
                    )
                    .await;
                Ok(())
            }

            ClientEvent::GroupCreated { group } => {
                let participants = group.participant_ids.clone();
                self.fan_out(&participants, ServerEvent::NewGroup { group })
                    .await;
                Ok(())
            }

            ClientEvent::GroupUpdated { group } => {
                let participants = group.participant_ids.clone();
                self.fan_out(&participants, ServerEvent::GroupUpdate { group })
                    .await;
                Ok(())
            }

            ClientEvent::MemberAdded { group, member_id } => {
                let participants = group.participant_ids.clone();
                self.fan_out(&participants, ServerEvent::MemberAdded { group, member_id })
                    .await;
                Ok(())
            }

            ClientEvent::MemberRemoved { group, member_id } => {
                let mut participants = group.participant_ids.clone();
                // The removed member still gets told.
                if !participants.contains(&member_id) {
                    participants.push(member_id);
                }
                self.fan_out(
                    &participants,
                    ServerEvent::MemberRemoved { group, member_id },
                )
                .await;
                Ok(())
            }

            ClientEvent::GroupDeleted {
                group_id,
                participant_ids,
            } => {
                self.fan_out(&participant_ids, ServerEvent::GroupDeleted { group_id })
                    .await;
                Ok(())
            }

            ClientEvent::AdminRoleChanged {
                group,
                member_id,
                is_admin,
            } => {
                let participants = group.participant_ids.clone();
                self.fan_out(
                    &participants,
                    ServerEvent::AdminRoleChanged {
                        group,
                        member_id,
                        is_admin,
                    },
                )
                .await;
                Ok(())
            }
        }
    }

    /// Deliver one event to each participant's personal room.
    async fn fan_out(&self, participant_ids: &[Uuid], event: ServerEvent) {
        for &pid in participant_ids {
            let delivered = self
                .inner
                .rooms
                .unicast(&self.inner.presence, pid, &event)
                .await;
            if delivered == 0 {
                debug!("{}", GatewayError::DeliveryGap(pid));
            }
        }
    }

    /// Run the reaction write and wait for it. Failure is logged only; the
    /// caller broadcasts regardless so clients converge on whatever state
    /// the store actually holds.
    async fn persist_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: String,
        action: ReactionAction,
    ) {
        let store = self.inner.store.clone();
        let result = tokio::task::spawn_blocking(move || match action {
            ReactionAction::Add => store.upsert_reaction(message_id, user_id, &emoji).map(|_| ()),
            ReactionAction::Remove => {
                store.remove_reaction(message_id, user_id, &emoji).map(|_| ())
            }
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("{}", GatewayError::Persistence(e)),
            Err(e) => warn!("reaction persistence task failed: {e}"),
        }
    }

    /// Create a notification on a detached task with logged-but-swallowed
    /// failure.
    fn spawn_notification(&self, notification: Notification) {
        let store = self.inner.store.clone();
        tokio::spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || store.create_notification(&notification))
                    .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{}", GatewayError::Persistence(e)),
                Err(e) => warn!("notification task failed: {e}"),
            }
        });
    }
}
