use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use courier_types::auth::Claims;
use courier_types::events::{ClientEvent, ServerEvent};

use crate::dispatcher::Dispatcher;
use crate::error::GatewayError;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a socket may sit in the Unauthenticated state before it is
/// refused.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one WebSocket connection through its lifecycle:
/// Unauthenticated -> Active -> Closed.
///
/// The first frame must be an `authenticate` event with a valid token;
/// anything else refuses the connection before it touches the presence
/// registry. Once Active, inbound events are dispatched one at a time in
/// arrival order. On close, the connection is torn out of every room and
/// the registry before this function returns.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match wait_for_authenticate(&mut receiver, &jwt_secret).await {
        Ok(claims) => claims,
        Err(e) => {
            warn!("connection refused: {}", e);
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "authentication failed".into(),
                })))
                .await;
            return;
        }
    };

    let user_id = claims.sub;
    let username = claims.username;

    info!("{} ({}) connected to gateway", username, user_id);

    // Active: delivery channel, personal room, presence entry.
    let (conn_id, mut user_rx) = dispatcher.connect(user_id).await;

    let ready = ServerEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        dispatcher.disconnect(user_id, conn_id).await;
        return;
    }

    // Send the current roster so a fresh client knows who is already online.
    for online_id in dispatcher.online_users().await {
        if online_id == user_id {
            continue;
        }
        let event = ServerEvent::UserOnline {
            user_id: online_id,
        };
        if sender
            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
            .await
            .is_err()
        {
            dispatcher.disconnect(user_id, conn_id).await;
            return;
        }
    }

    let mut broadcast_rx = dispatcher.subscribe();
    let dispatcher_recv = dispatcher.clone();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward global broadcasts + room deliveries -> client, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };

                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read events from the client, strictly in arrival order.
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    match serde_json::from_str::<ClientEvent>(&text) {
                        Ok(event) => {
                            if let Err(e) =
                                dispatcher_recv.dispatch(user_id, conn_id, event).await
                            {
                                warn!("{} ({}) event dropped: {}", username_recv, user_id, e);
                            }
                        }
                        Err(e) => {
                            let snippet: String = text.chars().take(200).collect();
                            warn!(
                                "{} ({}) bad event: {} -- raw: {}",
                                username_recv, user_id, e, snippet
                            );
                        }
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.disconnect(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

/// Unauthenticated state: the first text frame must be `authenticate` with
/// a token that verifies. Anything else (a bad token, a different event, a
/// timeout) refuses the connection.
async fn wait_for_authenticate(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Result<Claims, GatewayError> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(AUTH_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                return match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::Authenticate { token }) => decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .map(|data| data.claims)
                    .map_err(|e| GatewayError::Unauthenticated(e.to_string())),
                    Ok(_) => Err(GatewayError::Unauthenticated(
                        "event received before authentication".into(),
                    )),
                    Err(e) => Err(GatewayError::Unauthenticated(format!(
                        "malformed handshake frame: {e}"
                    ))),
                };
            }
        }
        Err(GatewayError::Unauthenticated(
            "socket closed during handshake".into(),
        ))
    });

    match timeout.await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::Unauthenticated("handshake timed out".into())),
    }
}
