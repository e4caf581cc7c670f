use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, trace, warn};
use uuid::Uuid;

use crate::dispatcher::Dispatcher;

/// Server sends a Ping every 15 seconds. Two missed Pongs (~30s) drop the
/// connection.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);
const MAX_MISSED_PONGS: u8 = 2;

/// Stream `owner_id`'s change events to one client until either side goes
/// away. The feed is one-way; client text frames are ignored.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, owner_id: Uuid) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before registering so nothing published in between is lost.
    let mut events = dispatcher.subscribe();
    let conn_id = dispatcher.register(owner_id).await;
    info!("Realtime subscriber {} connected for {}", conn_id, owner_id);

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received;

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed: u8 = 0;

        loop {
            tokio::select! {
                result = events.recv() => {
                    let event = match result {
                        Ok(event) => event,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Subscriber {} lagged by {} events", conn_id, n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };
                    if event.owner_id() != owner_id {
                        continue;
                    }
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode change event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed = 0;
                    } else {
                        missed += 1;
                        if missed >= MAX_MISSED_PONGS {
                            warn!("Heartbeat timeout on {} (missed {} pongs)", conn_id, missed);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                other => trace!("Ignoring client frame {:?}", other),
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.unregister(owner_id, conn_id).await;
    info!("Realtime subscriber {} for {} disconnected", conn_id, owner_id);
}
