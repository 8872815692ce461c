use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use campuslink_types::events::{RelayCommand, RelayEvent};

use crate::rooms::Rooms;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection: Identify handshake, Ready, then the
/// command/event loop until either side goes away.
pub async fn handle_connection(socket: WebSocket, rooms: Rooms, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify command with JWT
    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to relay", username, user_id);

    // Step 2: Send Ready event
    let ready = RelayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        return;
    }

    run_connection_loop(sender, receiver, rooms, user_id, username).await;
}

async fn run_connection_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut receiver: futures_util::stream::SplitStream<WebSocket>,
    rooms: Rooms,
    user_id: Uuid,
    username: String,
) {
    // Per-connection event channel. Room membership holds clones of `event_tx`;
    // everything routed to this connection funnels through `event_rx`.
    let conn_id = Uuid::new_v4();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<RelayEvent>();

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Spawn task to forward routed events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = event_rx.recv() => {
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

    // Read commands from client
    let rooms_recv = rooms.clone();
    let username_recv = username.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<RelayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(
                            &rooms_recv,
                            conn_id,
                            user_id,
                            &username_recv,
                            &event_tx,
                            cmd,
                        )
                        .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            &text[..text.len().min(200)]
                        );
                    }
                },
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

    rooms.leave_all(conn_id).await;
    info!("{} ({}) disconnected from relay", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use campuslink_types::api::Claims;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(std::time::Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(RelayCommand::Identify { token }) =
                    serde_json::from_str::<RelayCommand>(&text)
                {
                    let token_data = decode::<Claims>(
                        &token,
                        &DecodingKey::from_secret(jwt_secret.as_bytes()),
                        &Validation::default(),
                    )
                    .ok()?;

                    return Some((token_data.claims.sub, token_data.claims.username));
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

async fn handle_command(
    rooms: &Rooms,
    conn_id: Uuid,
    user_id: Uuid,
    username: &str,
    event_tx: &mpsc::UnboundedSender<RelayEvent>,
    cmd: RelayCommand,
) {
    match cmd {
        RelayCommand::Identify { .. } => {} // Already handled

        RelayCommand::JoinRoom { session_id } => {
            info!("{} ({}) joined room {}", username, user_id, session_id);
            rooms.join(session_id, conn_id, event_tx.clone()).await;
        }

        RelayCommand::LeaveRoom { session_id } => {
            info!("{} ({}) left room {}", username, user_id, session_id);
            rooms.leave(session_id, conn_id).await;
        }

        RelayCommand::SendMessage {
            session_id,
            sender_id,
            content,
            timestamp,
        } => {
            // The authenticated identity wins over whatever the client claims.
            if sender_id != user_id {
                warn!(
                    "{} ({}) sent message claiming sender {}, overriding",
                    username, user_id, sender_id
                );
            }
            let delivered = rooms
                .relay(
                    session_id,
                    conn_id,
                    RelayEvent::MessageReceive {
                        session_id,
                        sender_id: user_id,
                        sender_username: username.to_string(),
                        content,
                        timestamp,
                    },
                )
                .await;
            info!(
                "{} ({}) -> room {} ({} recipients)",
                username, user_id, session_id, delivered
            );
        }
    }
}
