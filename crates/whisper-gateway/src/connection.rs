use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use whisper_types::events::{GatewayCommand, GatewayEvent};

use crate::Gateway;
use crate::dispatcher::ConnectionId;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Time a client without an upgrade credential has to send `identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Drive one WebSocket from handshake to disconnect. `credential` is the token
/// taken from the upgrade request, if any; without one the client must send
/// an `identify` command first.
pub async fn handle_connection(socket: WebSocket, gateway: Gateway, credential: Option<String>) {
    let (mut sender, mut receiver) = socket.split();

    let credential = match credential {
        Some(token) => token,
        None => match wait_for_identify(&mut receiver).await {
            Some(token) => token,
            None => {
                warn!("WebSocket client failed to identify, closing");
                close(&mut sender, "identify required").await;
                return;
            }
        },
    };

    let session = match gateway.registry.on_connect(&credential).await {
        Ok(session) => session,
        Err(e) => {
            warn!("Rejecting connection: {}", e);
            close(&mut sender, "unauthenticated").await;
            return;
        }
    };
    let conn_id = session.conn_id;
    let user_id = session.user_id;

    let ready = GatewayEvent::Ready {
        user_id,
        conversation_ids: session.conversation_ids,
    };
    let delivered = match encode(&ready) {
        Some(frame) => sender.send(frame).await.is_ok(),
        None => false,
    };
    if !delivered {
        gateway.registry.on_disconnect(conn_id, user_id, "ready not delivered").await;
        return;
    }

    let mut events = session.events;

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        return "unregistered".to_string();
                    };
                    let Some(frame) = encode(&event) else {
                        continue;
                    };
                    if sender.send(frame).await.is_err() {
                        return "send failed".to_string();
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            return "heartbeat timeout".to_string();
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        return "send failed".to_string();
                    }
                }
            }
        }
    });

    let command_gateway = gateway.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    Ok(command) => {
                        // Awaiting the spawned task keeps this connection's commands
                        // ordered; the task itself outlives an aborted reader.
                        let task = tokio::spawn(run_command(command_gateway.clone(), conn_id, user_id, command));
                        if let Err(e) = task.await {
                            error!("Command task for {} ({}) failed: {}", user_id, conn_id, e);
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            user_id,
                            conn_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(frame) => {
                    return match frame {
                        Some(frame) if !frame.reason.is_empty() => frame.reason.to_string(),
                        _ => "client closed".to_string(),
                    };
                }
                _ => {}
            }
        }
        "stream ended".to_string()
    });

    let reason = tokio::select! {
        result = &mut send_task => {
            recv_task.abort();
            result.unwrap_or_else(|e| format!("send task failed: {}", e))
        }
        result = &mut recv_task => {
            send_task.abort();
            result.unwrap_or_else(|e| format!("receive task failed: {}", e))
        }
    };

    gateway.registry.on_disconnect(conn_id, user_id, &reason).await;
}

/// Execute one command. Store failures are reported to this connection only.
async fn run_command(gateway: Gateway, conn_id: ConnectionId, user_id: Uuid, command: GatewayCommand) {
    let operation = command.name();
    match gateway.execute(conn_id, user_id, command).await {
        Ok(outcome) => {
            debug!("{} ({}) {} -> {:?}", user_id, conn_id, operation, outcome);
        }
        Err(e) => {
            error!("{} ({}) {} failed: {}", user_id, conn_id, operation, e);
            gateway
                .dispatcher
                .send_to_connection(
                    conn_id,
                    GatewayEvent::Error {
                        operation: operation.to_string(),
                        message: e.to_string(),
                    },
                )
                .await;
        }
    }
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>) -> Option<String> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(text.as_str()) {
                    return Some(token);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

async fn close(sender: &mut SplitSink<WebSocket, Message>, reason: &'static str) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    if sender.send(Message::Close(Some(frame))).await.is_err() {
        info!("Client went away before close frame: {}", reason);
    }
}

fn encode(event: &GatewayEvent) -> Option<Message> {
    match serde_json::to_string(event) {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!("Failed to encode {:?}: {}", event, e);
            None
        }
    }
}
