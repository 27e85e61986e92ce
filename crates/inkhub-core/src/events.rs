// In-process fan-out of live events to connected WebSocket sessions.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::model::{Chat, Notification};

const DEFAULT_CAPACITY: usize = 256;

/// Payload pushed to a user's live session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    Notification { notification: Notification },
    MessageSent { message: Chat },
}

/// An event addressed to a single user.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub user_id: i64,
    pub event: LiveEvent,
}

/// Broadcast hub. Every session subscribes and keeps only the envelopes
/// addressed to its own user.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<Envelope>,
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns the number of sessions that received the event. Zero is fine:
    /// the user is simply offline and reads it from the REST API later.
    pub fn publish(&self, user_id: i64, event: LiveEvent) -> usize {
        match self.tx.send(Envelope { user_id, event }) {
            Ok(n) => n,
            Err(_) => {
                debug!(user_id, "no live sessions for event");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Envelope> {
        self.tx.subscribe()
    }
}
