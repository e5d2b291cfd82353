//! Cast session, pipeline ownership and caller-facing result types

use super::decoder::DecoderProcess;
use super::pacer::Pacer;
use super::sink::{SinkConnection, SinkExit};
use crate::error::Error;
use roomcast_common::CastStatus;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// How to close the sink during teardown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkClose {
    /// Trailing silence and half-close (stop, replacement)
    Flush,
    /// Drop the socket immediately (pause, seek)
    Abort,
}

/// Decoder → pacer → sink for one launch of a session
pub struct Pipeline {
    pub generation: u64,
    pub decoder: DecoderProcess,
    pub pacer: Pacer,
    pub sink: SinkConnection,
}

impl Pipeline {
    /// Tear down every stage; pacing is stopped first so no more audio reaches the sink
    pub async fn teardown(mut self, close: SinkClose) -> Option<SinkExit> {
        self.pacer.stop();
        self.decoder.shutdown().await;
        match close {
            SinkClose::Flush => Some(self.sink.finish().await),
            SinkClose::Abort => {
                self.sink.abort();
                None
            }
        }
    }

    pub fn bytes_streamed(&self) -> u64 {
        self.pacer.stats().released()
    }
}

/// The single in-flight cast
pub struct Session {
    pub id: Uuid,
    pub track_id: String,
    pub title: Option<String>,
    pub started_at: Instant,
    pub status: CastStatus,
    pub error: Option<String>,
    /// Offset the current (or last) pipeline was launched at
    pub seek_offset: Duration,
    /// Generation of the attached pipeline; watchers compare against it
    pub generation: u64,
    pub pipeline: Option<Pipeline>,
}

impl Session {
    pub fn new(track_id: String, title: Option<String>, seek_offset: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            track_id,
            title,
            started_at: Instant::now(),
            status: CastStatus::Starting,
            error: None,
            seek_offset,
            generation: 0,
            pipeline: None,
        }
    }

    /// Detach and tear down the pipeline, if any
    pub async fn release_pipeline(&mut self, close: SinkClose) -> Option<SinkExit> {
        let pipeline = self.pipeline.take()?;
        debug!(
            "Tearing down pipeline {} for {} ({:?})",
            pipeline.generation, self.track_id, close
        );
        pipeline.teardown(close).await
    }

    pub fn report(&self, enabled: bool) -> StatusReport {
        StatusReport {
            active: true,
            enabled,
            track_id: Some(self.track_id.clone()),
            title: self.title.clone(),
            status: Some(self.status),
            error: self.error.clone(),
            duration_ms: Some(self.started_at.elapsed().as_millis() as u64),
            seek_offset_secs: Some(self.seek_offset.as_secs_f64()),
            bytes_streamed: self.pipeline.as_ref().map(Pipeline::bytes_streamed),
            connection_id: self.pipeline.as_ref().map(|p| p.sink.id()),
            message: None,
        }
    }
}

/// Status query result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub active: bool,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<CastStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seek_offset_secs: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_streamed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusReport {
    pub fn inactive(enabled: bool) -> Self {
        Self {
            active: false,
            enabled,
            track_id: None,
            title: None,
            status: None,
            error: None,
            duration_ms: None,
            seek_offset_secs: None,
            bytes_streamed: None,
            connection_id: None,
            message: Some("No active stream".to_string()),
        }
    }
}

/// Outcome of a control operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CastResult {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl CastResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(message: impl Into<String>, error: &Error) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }
}
