use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use sparrow_types::api::Claims;
use sparrow_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::{ConnectionSignal, Dispatcher};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long the client has to send a valid `identify` command.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a single WebSocket connection. The client must identify with
/// the same JWT it uses for REST calls before anything else happens;
/// a client-asserted user id is never trusted.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let (user_id, username) = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} ({}) connected to gateway", username, user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        username: username.clone(),
    };
    let Ok(ready_json) = serde_json::to_string(&ready) else {
        return;
    };
    if sender.send(Message::Text(ready_json.into())).await.is_err() {
        return;
    }

    // Registering may tell a previous connection of this user to close.
    let (conn_id, mut signal_rx) = dispatcher.register_connection(user_id).await;

    let mut event_rx = dispatcher.subscribe();
    let dispatcher_recv = dispatcher.clone();

    // Joined conversation rooms, shared between the send and recv tasks.
    let rooms: Arc<std::sync::RwLock<HashSet<Uuid>>> =
        Arc::new(std::sync::RwLock::new(HashSet::new()));
    let send_rooms = rooms.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward bus events -> client, filtered by joined rooms, with heartbeat.
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = event_rx.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Event receiver lagged by {} events", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    // Room-scoped delivery; typing state never echoes back
                    // at the typer.
                    match event.conversation_id() {
                        Some(conversation_id) => {
                            let joined = send_rooms
                                .read()
                                .expect("room lock poisoned")
                                .contains(&conversation_id);
                            if !joined {
                                continue;
                            }
                        }
                        None => continue,
                    }
                    if event.typist() == Some(user_id) {
                        continue;
                    }

                    let Ok(text) = serde_json::to_string(&event) else {
                        continue;
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                result = signal_rx.recv() => {
                    match result {
                        Some(ConnectionSignal::Superseded) => {
                            info!("Connection superseded by a newer one, closing socket");
                            let _ = sender.send(Message::Close(None)).await;
                            break;
                        }
                        None => break,
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

    // Read commands from the client.
    let username_recv = username.clone();
    let recv_rooms = rooms.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, user_id, &username_recv, cmd, &recv_rooms);
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            username_recv,
                            user_id,
                            e,
                            truncate_at_char(&text, 200)
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

    dispatcher.unregister_connection(user_id, conn_id).await;
    info!("{} ({}) disconnected from gateway", username, user_id);
}

async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<(Uuid, String)> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let timeout = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
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

fn handle_command(
    dispatcher: &Dispatcher,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
    rooms: &Arc<std::sync::RwLock<HashSet<Uuid>>>,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::JoinConversation { conversation_id } => {
            info!("{} ({}) joined room {}", username, user_id, conversation_id);
            rooms
                .write()
                .expect("room lock poisoned")
                .insert(conversation_id);
        }

        GatewayCommand::LeaveConversation { conversation_id } => {
            info!("{} ({}) left room {}", username, user_id, conversation_id);
            rooms
                .write()
                .expect("room lock poisoned")
                .remove(&conversation_id);
        }

        GatewayCommand::Typing {
            conversation_id,
            is_typing,
        } => {
            dispatcher.publish(GatewayEvent::UserTyping {
                conversation_id,
                user_id,
                is_typing,
            });
        }
    }
}

/// Log-safe prefix of a client payload, cut on a char boundary so
/// multibyte text near the limit cannot split a code point.
fn truncate_at_char(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_at_char;

    #[test]
    fn truncation_respects_char_boundaries() {
        let short = "hello";
        assert_eq!(truncate_at_char(short, 200), short);

        // 300 two-byte chars: byte 200 lands mid-code-point.
        let wide = "é".repeat(300);
        let cut = truncate_at_char(&wide, 200);
        assert_eq!(cut.chars().count(), 200);
        assert!(wide.is_char_boundary(cut.len()));
    }
}
