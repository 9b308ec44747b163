use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::SlotEvent;

const DEFAULT_CAPACITY: usize = 256;

/// Fan-out of applied slot transitions to every connected listener.
#[derive(Clone)]
pub struct SlotEventHub {
    sender: broadcast::Sender<SlotEvent>,
}

impl SlotEventHub {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Returns how many listeners received the event.
    pub fn publish(&self, event: SlotEvent) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => {
                debug!("Slot event delivered to {} listeners", receivers);
                receivers
            }
            // No one is listening.
            Err(_) => 0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SlotEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SlotEventHub {
    fn default() -> Self {
        Self::new()
    }
}

pub fn matches_filter(event: &SlotEvent, professional_id: Option<Uuid>) -> bool {
    professional_id.map_or(true, |id| event.professional_id == id)
}

/// Forwards hub events to one WebSocket client until either side goes away.
pub async fn stream_events(
    socket: WebSocket,
    mut events: broadcast::Receiver<SlotEvent>,
    professional_id: Option<Uuid>,
    user_id: String,
) {
    let (mut sink, mut stream) = socket.split();
    info!("Schedule event stream opened for user {}", user_id);

    loop {
        tokio::select! {
            received = events.recv() => {
                match received {
                    Ok(event) => {
                        if !matches_filter(&event, professional_id) {
                            continue;
                        }
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Could not serialize slot event: {}", e);
                                continue;
                            }
                        };
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event stream for user {} lagged, {} events skipped", user_id, skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    // Clients only listen; anything else is ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = sink.close().await;
    info!("Schedule event stream closed for user {}", user_id);
}
