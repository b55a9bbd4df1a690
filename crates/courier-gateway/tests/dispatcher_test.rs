use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use courier_gateway::dispatcher::Dispatcher;
use courier_gateway::rooms::RoomId;
use courier_gateway::store::SideEffectStore;
use courier_types::events::{ClientEvent, ServerEvent};
use courier_types::models::{Group, MessageKind, Notification, ReactionAction};

/// In-memory store mirroring the idempotence contract of the SQLite one.
#[derive(Default)]
struct MemoryStore {
    reactions: Mutex<HashSet<(Uuid, Uuid, String)>>,
    notifications: Mutex<Vec<Notification>>,
}

impl SideEffectStore for MemoryStore {
    fn upsert_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> anyhow::Result<bool> {
        Ok(self
            .reactions
            .lock()
            .unwrap()
            .insert((message_id, user_id, emoji.to_string())))
    }

    fn remove_reaction(
        &self,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) -> anyhow::Result<bool> {
        Ok(self
            .reactions
            .lock()
            .unwrap()
            .remove(&(message_id, user_id, emoji.to_string())))
    }

    fn create_notification(&self, notification: &Notification) -> anyhow::Result<()> {
        self.notifications.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Store whose writes always fail, for partial-failure tests.
struct FailingStore;

impl SideEffectStore for FailingStore {
    fn upsert_reaction(&self, _: Uuid, _: Uuid, _: &str) -> anyhow::Result<bool> {
        anyhow::bail!("store offline")
    }

    fn remove_reaction(&self, _: Uuid, _: Uuid, _: &str) -> anyhow::Result<bool> {
        anyhow::bail!("store offline")
    }

    fn create_notification(&self, _: &Notification) -> anyhow::Result<()> {
        anyhow::bail!("store offline")
    }
}

fn send_message_event(
    conversation_id: Uuid,
    sender_id: Uuid,
    receiver_id: Option<Uuid>,
    content: &str,
) -> ClientEvent {
    ClientEvent::SendMessage {
        conversation_id,
        sender_id,
        receiver_id,
        message: content.to_string(),
        kind: MessageKind::Text,
        attachment: None,
        message_id: Uuid::new_v4(),
        temp_id: None,
    }
}

#[tokio::test]
async fn message_reaches_members_but_not_the_origin_connection() {
    let dispatcher = Dispatcher::new(Arc::new(MemoryStore::default()));
    let conversation = Uuid::new_v4();

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let (alice_conn, mut alice_rx) = dispatcher.connect(alice).await;
    let (bob_conn, mut bob_rx) = dispatcher.connect(bob).await;

    dispatcher
        .rooms()
        .join(alice_conn, RoomId::Conversation(conversation))
        .await;
    dispatcher
        .rooms()
        .join(bob_conn, RoomId::Conversation(conversation))
        .await;

    dispatcher
        .dispatch(
            alice,
            alice_conn,
            send_message_event(conversation, alice, None, "hi"),
        )
        .await
        .unwrap();

    match bob_rx.try_recv() {
        Ok(ServerEvent::ReceiveMessage { message }) => {
            assert_eq!(message.content, "hi");
            assert_eq!(message.sender_id, alice);
        }
        other => panic!("expected receiveMessage, got {other:?}"),
    }
    assert!(alice_rx.try_recv().is_err(), "origin must not get its echo");
}

#[tokio::test]
async fn reconnect_does_not_inherit_conversation_membership() {
    let dispatcher = Dispatcher::new(Arc::new(MemoryStore::default()));
    let conversation = Uuid::new_v4();

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let (alice_conn, _alice_rx) = dispatcher.connect(alice).await;

    let (bob_conn, mut bob_rx) = dispatcher.connect(bob).await;
    dispatcher
        .rooms()
        .join(bob_conn, RoomId::Conversation(conversation))
        .await;

    // Bob drops and comes back without re-issuing joinConversation.
    dispatcher.disconnect(bob, bob_conn).await;
    let (_bob_conn2, mut bob_rx2) = dispatcher.connect(bob).await;

    dispatcher
        .dispatch(
            alice,
            alice_conn,
            send_message_event(conversation, alice, None, "anyone here?"),
        )
        .await
        .unwrap();

    assert!(bob_rx2.try_recv().is_err(), "membership is connection-scoped");
    assert!(bob_rx.try_recv().is_err());
}

#[tokio::test]
async fn notification_failure_does_not_block_the_broadcast() {
    let dispatcher = Dispatcher::new(Arc::new(FailingStore));
    let conversation = Uuid::new_v4();

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let (alice_conn, _alice_rx) = dispatcher.connect(alice).await;
    let (bob_conn, mut bob_rx) = dispatcher.connect(bob).await;

    dispatcher
        .rooms()
        .join(alice_conn, RoomId::Conversation(conversation))
        .await;
    dispatcher
        .rooms()
        .join(bob_conn, RoomId::Conversation(conversation))
        .await;

    dispatcher
        .dispatch(
            alice,
            alice_conn,
            send_message_event(conversation, alice, Some(bob), "hello"),
        )
        .await
        .unwrap();

    assert!(
        matches!(bob_rx.try_recv(), Ok(ServerEvent::ReceiveMessage { .. })),
        "broadcast must land even when notification persistence fails"
    );
}

#[tokio::test]
async fn notification_is_recorded_for_a_distinct_receiver() {
    let store = Arc::new(MemoryStore::default());
    let dispatcher = Dispatcher::new(store.clone());
    let conversation = Uuid::new_v4();

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let (alice_conn, _alice_rx) = dispatcher.connect(alice).await;

    dispatcher
        .dispatch(
            alice,
            alice_conn,
            send_message_event(conversation, alice, Some(bob), "ping"),
        )
        .await
        .unwrap();

    // The write runs on a detached task; give it a moment.
    let mut recorded = false;
    for _ in 0..50 {
        if !store.notifications.lock().unwrap().is_empty() {
            recorded = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(recorded, "notification write never landed");

    let notifications = store.notifications.lock().unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].sender_id, alice);
    assert_eq!(notifications[0].receiver_id, bob);
}

#[tokio::test]
async fn duplicate_reaction_adds_collapse_to_one_entry() {
    let store = Arc::new(MemoryStore::default());
    let dispatcher = Dispatcher::new(store.clone());
    let conversation = Uuid::new_v4();
    let message_id = Uuid::new_v4();

    let bob = Uuid::new_v4();
    let (conn_a, _rx_a) = dispatcher.connect(bob).await;
    let (conn_b, _rx_b) = dispatcher.connect(bob).await;

    // Same add from two devices, concurrently.
    let react = |conn| {
        dispatcher.dispatch(
            bob,
            conn,
            ClientEvent::MessageReaction {
                message_id,
                conversation_id: conversation,
                emoji: "👍".into(),
                action: ReactionAction::Add,
            },
        )
    };
    let (a, b) = tokio::join!(react(conn_a), react(conn_b));
    a.unwrap();
    b.unwrap();

    let reactions = store.reactions.lock().unwrap();
    assert_eq!(reactions.len(), 1);
    assert!(reactions.contains(&(message_id, bob, "👍".to_string())));
}

#[tokio::test]
async fn reaction_broadcast_includes_the_actor() {
    let dispatcher = Dispatcher::new(Arc::new(MemoryStore::default()));
    let conversation = Uuid::new_v4();

    let alice = Uuid::new_v4();
    let (alice_conn, mut alice_rx) = dispatcher.connect(alice).await;
    dispatcher
        .rooms()
        .join(alice_conn, RoomId::Conversation(conversation))
        .await;

    dispatcher
        .dispatch(
            alice,
            alice_conn,
            ClientEvent::MessageReaction {
                message_id: Uuid::new_v4(),
                conversation_id: conversation,
                emoji: "❤️".into(),
                action: ReactionAction::Add,
            },
        )
        .await
        .unwrap();

    match alice_rx.try_recv() {
        Ok(ServerEvent::MessageReaction { user_id, action, .. }) => {
            assert_eq!(user_id, alice);
            assert_eq!(action, ReactionAction::Add);
        }
        other => panic!("actor must hear its own reaction, got {other:?}"),
    }
}

#[tokio::test]
async fn reaction_broadcast_survives_a_failing_store() {
    let dispatcher = Dispatcher::new(Arc::new(FailingStore));
    let conversation = Uuid::new_v4();

    let alice = Uuid::new_v4();
    let (alice_conn, mut alice_rx) = dispatcher.connect(alice).await;
    dispatcher
        .rooms()
        .join(alice_conn, RoomId::Conversation(conversation))
        .await;

    dispatcher
        .dispatch(
            alice,
            alice_conn,
            ClientEvent::MessageReaction {
                message_id: Uuid::new_v4(),
                conversation_id: conversation,
                emoji: "👍".into(),
                action: ReactionAction::Add,
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        alice_rx.try_recv(),
        Ok(ServerEvent::MessageReaction { .. })
    ));
}

#[tokio::test]
async fn typing_relay_skips_the_sender() {
    let dispatcher = Dispatcher::new(Arc::new(MemoryStore::default()));
    let conversation = Uuid::new_v4();

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let (alice_conn, mut alice_rx) = dispatcher.connect(alice).await;
    let (bob_conn, mut bob_rx) = dispatcher.connect(bob).await;
    dispatcher
        .rooms()
        .join(alice_conn, RoomId::Conversation(conversation))
        .await;
    dispatcher
        .rooms()
        .join(bob_conn, RoomId::Conversation(conversation))
        .await;

    dispatcher
        .dispatch(
            alice,
            alice_conn,
            ClientEvent::Typing {
                conversation_id: conversation,
                is_typing: true,
            },
        )
        .await
        .unwrap();

    assert!(matches!(
        bob_rx.try_recv(),
        Ok(ServerEvent::UserTyping { is_typing: true, .. })
    ));
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn group_events_fan_out_to_personal_rooms() {
    let dispatcher = Dispatcher::new(Arc::new(MemoryStore::default()));

    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let offline = Uuid::new_v4();
    let (alice_conn, mut alice_rx) = dispatcher.connect(alice).await;
    let (_bob_conn, mut bob_rx) = dispatcher.connect(bob).await;

    let group = Group {
        id: Uuid::new_v4(),
        name: "weekend plans".into(),
        participant_ids: vec![alice, bob, offline],
    };

    dispatcher
        .dispatch(alice, alice_conn, ClientEvent::GroupCreated { group })
        .await
        .unwrap();

    // No joinConversation needed: personal rooms are automatic.
    assert!(matches!(bob_rx.try_recv(), Ok(ServerEvent::NewGroup { .. })));
    assert!(matches!(alice_rx.try_recv(), Ok(ServerEvent::NewGroup { .. })));
    // The offline participant is silently skipped; the durable notification
    // path is the only trace for them.
}

#[tokio::test]
async fn offline_broadcast_fires_once_for_multi_device_users() {
    let dispatcher = Dispatcher::new(Arc::new(MemoryStore::default()));
    let mut global_rx = dispatcher.subscribe();

    let alice = Uuid::new_v4();
    let (conn_a, _rx_a) = dispatcher.connect(alice).await;
    let (conn_b, _rx_b) = dispatcher.connect(alice).await;

    dispatcher.disconnect(alice, conn_a).await;
    dispatcher.disconnect(alice, conn_b).await;

    let mut online = 0;
    let mut offline = 0;
    while let Ok(event) = global_rx.try_recv() {
        match event {
            ServerEvent::UserOnline { user_id } if user_id == alice => online += 1,
            ServerEvent::UserOffline { user_id } if user_id == alice => offline += 1,
            _ => {}
        }
    }
    assert_eq!(online, 1, "online broadcast only for the first connection");
    assert_eq!(offline, 1, "offline broadcast only for the last disconnect");
    assert!(dispatcher.presence().lookup(alice).await.is_empty());
}

#[tokio::test]
async fn status_update_is_broadcast_globally() {
    let dispatcher = Dispatcher::new(Arc::new(MemoryStore::default()));
    let mut global_rx = dispatcher.subscribe();

    let alice = Uuid::new_v4();
    let (alice_conn, _alice_rx) = dispatcher.connect(alice).await;

    dispatcher
        .dispatch(
            alice,
            alice_conn,
            ClientEvent::UpdateStatus {
                status: "do not disturb".into(),
            },
        )
        .await
        .unwrap();

    // Skip the presence event from connect, then expect the status change.
    loop {
        match global_rx.try_recv() {
            Ok(ServerEvent::UserStatusUpdate { user_id, status }) => {
                assert_eq!(user_id, alice);
                assert_eq!(status, "do not disturb");
                break;
            }
            Ok(_) => continue,
            Err(e) => panic!("status update never arrived: {e}"),
        }
    }
}

#[tokio::test]
async fn invalid_send_message_is_dropped_without_killing_the_connection() {
    let dispatcher = Dispatcher::new(Arc::new(MemoryStore::default()));
    let conversation = Uuid::new_v4();

    let alice = Uuid::new_v4();
    let (alice_conn, _alice_rx) = dispatcher.connect(alice).await;
    dispatcher
        .rooms()
        .join(alice_conn, RoomId::Conversation(conversation))
        .await;

    // Neither content nor attachment.
    let err = dispatcher
        .dispatch(
            alice,
            alice_conn,
            send_message_event(conversation, alice, None, "   "),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid event payload"));

    // Spoofed sender id.
    let err = dispatcher
        .dispatch(
            alice,
            alice_conn,
            send_message_event(conversation, Uuid::new_v4(), None, "hi"),
        )
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid event payload"));

    // The connection is still serviceable.
    dispatcher
        .dispatch(
            alice,
            alice_conn,
            send_message_event(conversation, alice, None, "still here"),
        )
        .await
        .unwrap();
}
