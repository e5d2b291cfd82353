//! Event types for the roomcast event system
//!
//! Events are broadcast by the casting engine on every session transition and
//! forwarded to SSE clients as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Cast session status
///
/// `stopping` is transient (teardown in progress). `finished` and `error`
/// are terminal for a pipeline; a `paused` session keeps its track but owns
/// no pipeline resources.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CastStatus {
    Starting,
    Streaming,
    Paused,
    Stopping,
    Finished,
    Error,
}

impl std::fmt::Display for CastStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CastStatus::Starting => write!(f, "starting"),
            CastStatus::Streaming => write!(f, "streaming"),
            CastStatus::Paused => write!(f, "paused"),
            CastStatus::Stopping => write!(f, "stopping"),
            CastStatus::Finished => write!(f, "finished"),
            CastStatus::Error => write!(f, "error"),
        }
    }
}

/// roomcast event types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CastEvent {
    /// Session moved to a new status
    StatusChanged {
        session_id: Uuid,
        track_id: String,
        status: CastStatus,
        timestamp: DateTime<Utc>,
    },

    /// Track played out completely and the sink was flushed
    StreamFinished {
        session_id: Uuid,
        track_id: String,
        bytes_streamed: u64,
        timestamp: DateTime<Utc>,
    },

    /// Session entered the error state
    StreamError {
        session_id: Uuid,
        track_id: String,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl CastEvent {
    /// Event name used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            CastEvent::StatusChanged { .. } => "StatusChanged",
            CastEvent::StreamFinished { .. } => "StreamFinished",
            CastEvent::StreamError { .. } => "StreamError",
        }
    }
}
