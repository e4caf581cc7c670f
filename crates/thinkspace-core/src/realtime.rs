//! Realtime feed: turns change notifications into `Inbound` messages for the
//! sync engine. There is no reconnection here; a dropped channel only flips
//! the connectivity flag.

use futures_util::StreamExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, trace, warn};
use uuid::Uuid;

use thinkspace_types::ChangeEvent;

use crate::sync::Inbound;

/// WebSocket subscription to `/realtime/{owner_id}` on the server.
pub struct RealtimeClient {
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// Connect in the background and forward every decoded event.
    pub fn connect(url: String, inbound: mpsc::UnboundedSender<Inbound>) -> Self {
        let task = tokio::spawn(async move {
            let (mut frames, _) = match tokio_tungstenite::connect_async(url.as_str()).await {
                Ok(connected) => connected,
                Err(e) => {
                    warn!("Realtime connect to {} failed: {}", url, e);
                    let _ = inbound.send(Inbound::Connectivity(false));
                    return;
                }
            };
            info!("Realtime connected to {}", url);
            let _ = inbound.send(Inbound::Connectivity(true));

            // Pings are answered by tungstenite while we read.
            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ChangeEvent>(&text) {
                        Ok(event) => {
                            if inbound.send(Inbound::Event(event)).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let raw: String = text.chars().take(200).collect();
                            warn!("Bad realtime frame: {} -- raw: {}", e, raw);
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(other) => trace!("Ignoring realtime frame {:?}", other),
                    Err(e) => {
                        warn!("Realtime channel error: {}", e);
                        break;
                    }
                }
            }

            info!("Realtime channel closed");
            let _ = inbound.send(Inbound::Connectivity(false));
        });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn close(self) {
        self.task.abort();
    }
}

/// Forward an in-process change feed (the embedded row service) for one
/// owner. Reports connected while the feed is open.
pub fn follow(
    mut changes: broadcast::Receiver<ChangeEvent>,
    owner_id: Uuid,
    inbound: mpsc::UnboundedSender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _ = inbound.send(Inbound::Connectivity(true));
        loop {
            match changes.recv().await {
                Ok(event) if event.owner_id() == owner_id => {
                    if inbound.send(Inbound::Event(event)).is_err() {
                        return;
                    }
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Change feed lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        let _ = inbound.send(Inbound::Connectivity(false));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock;
    use thinkspace_types::{ChangeKind, Row, ThoughtChain};

    #[tokio::test]
    async fn test_follow_filters_by_owner() {
        let (changes, rx) = broadcast::channel(16);
        let (inbound_tx, mut inbound) = mpsc::unbounded_channel();
        let owner = Uuid::new_v4();
        let task = follow(rx, owner, inbound_tx);

        assert!(matches!(inbound.recv().await, Some(Inbound::Connectivity(true))));

        let other = ChangeEvent::new(ChangeKind::Insert, Row::ThoughtChains(ThoughtChain::new(Uuid::new_v4(), clock::now())));
        let mine = ChangeEvent::new(ChangeKind::Insert, Row::ThoughtChains(ThoughtChain::new(owner, clock::now())));
        changes.send(other).unwrap();
        changes.send(mine.clone()).unwrap();
        drop(changes);

        match inbound.recv().await {
            Some(Inbound::Event(event)) => assert_eq!(event, mine),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(inbound.recv().await, Some(Inbound::Connectivity(false))));
        task.await.unwrap();
    }
}
