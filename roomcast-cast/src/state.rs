//! Shared service state
//!
//! Holds the event broadcaster used by the casting engine and the SSE endpoint.

use roomcast_common::events::CastEvent;
use tokio::sync::broadcast;

/// Events buffered per SSE subscriber before it starts lagging
const EVENT_BUFFER: usize = 100;

/// Shared state accessible by all components
pub struct SharedState {
    /// Event broadcaster for SSE events
    pub event_tx: broadcast::Sender<CastEvent>,
}

impl SharedState {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { event_tx }
    }

    /// Broadcast an event to all SSE listeners
    pub fn broadcast_event(&self, event: CastEvent) {
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    /// Subscribe to event stream for SSE
    pub fn subscribe_events(&self) -> broadcast::Receiver<CastEvent> {
        self.event_tx.subscribe()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_common::CastStatus;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_subscribers_receive_broadcasts() {
        let state = SharedState::new();
        let mut rx = state.subscribe_events();

        state.broadcast_event(CastEvent::StatusChanged {
            session_id: Uuid::new_v4(),
            track_id: "abc123".to_string(),
            status: CastStatus::Streaming,
            timestamp: chrono::Utc::now(),
        });

        match rx.recv().await.unwrap() {
            CastEvent::StatusChanged { track_id, status, .. } => {
                assert_eq!(track_id, "abc123");
                assert_eq!(status, CastStatus::Streaming);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_broadcast_without_subscribers_is_ok() {
        let state = SharedState::new();
        state.broadcast_event(CastEvent::StreamFinished {
            session_id: Uuid::new_v4(),
            track_id: "abc123".to_string(),
            bytes_streamed: 0,
            timestamp: chrono::Utc::now(),
        });
    }
}
