//! Casting engine - single-session state machine
//!
//! **Responsibilities:**
//! - Owns the one `Option<Session>` slot; every control operation holds the
//!   slot lock for its whole transition, so operations are serialized and a
//!   new one fully supersedes the last
//! - Builds pipelines (sink connect, cache-or-acquire, decoder, pacer) and
//!   tears down whatever was partially built when a step fails
//! - Watches each pipeline for natural completion or mid-stream failure
//!
//! Transitions: `starting → streaming → {paused, finished, error}`,
//! `paused → streaming` (resume) or cleared (stop). `stopping` is held while
//! a pipeline is being torn down.

use super::acquisition::AcquisitionTool;
use super::cache::AudioCache;
use super::decoder::{AudioSource, Decoder};
use super::durable::DurableCache;
use super::format::PcmFormat;
use super::pacer::{Pacer, PacerExit, PacingSchedule};
use super::session::{CastResult, Pipeline, Session, SinkClose, StatusReport};
use super::sink::{SinkConnection, SinkExit, SinkSettings};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::state::SharedState;
use roomcast_common::events::CastEvent;
use roomcast_common::{time, CastStatus};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, error, info, warn};

type SessionSlot = Arc<Mutex<Option<Session>>>;

/// Casting engine - orchestrates cache, decoder, pacer and sink
pub struct CastEngine {
    enabled: bool,
    sink: SinkSettings,
    schedule: PacingSchedule,
    tick: Duration,
    decoder: Decoder,
    acquisition: AcquisitionTool,
    cache: Arc<AudioCache>,
    state: Arc<SharedState>,
    slot: SessionSlot,
    next_generation: AtomicU64,
}

impl CastEngine {
    /// Create an engine around an existing cache
    pub fn new(config: &Config, cache: Arc<AudioCache>, state: Arc<SharedState>) -> Self {
        let format = PcmFormat::CD;
        Self {
            enabled: config.cast.enabled,
            sink: SinkSettings::from_config(&config.sink, format),
            schedule: PacingSchedule::from_config(format, &config.pacing),
            tick: config.pacing.tick(),
            decoder: Decoder::from_config(&config.decoder, format),
            acquisition: AcquisitionTool::from_config(&config.acquisition),
            cache,
            state,
            slot: Arc::new(Mutex::new(None)),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Create an engine, opening the durable cache when one is configured
    pub async fn from_config(config: &Config, state: Arc<SharedState>) -> Result<Self> {
        config.validate()?;

        let durable = match &config.cache.db_path {
            Some(path) => {
                let durable =
                    DurableCache::open(path, config.cache.ttl(), config.cache.min_valid_bytes).await?;
                match durable.purge_expired().await {
                    Ok(0) => {}
                    Ok(n) => info!("Purged {} expired durable cache entries", n),
                    Err(e) => warn!("Failed to purge durable cache: {}", e),
                }
                Some(durable)
            }
            None => {
                info!("Durable audio cache disabled");
                None
            }
        };

        let cache = Arc::new(AudioCache::new(config.cache.capacity, durable));
        Ok(Self::new(config, cache, state))
    }

    pub fn cache(&self) -> &Arc<AudioCache> {
        &self.cache
    }

    /// Start casting `track_id`
    ///
    /// The same track already active is treated as a seek (or a resume when
    /// paused). A different track tears the current session down first.
    pub async fn start(&self, track_id: &str, title: Option<String>, seek: Duration) -> CastResult {
        if !self.enabled {
            let err = Error::InvalidState("casting is disabled".to_string());
            return CastResult::failed("Casting is disabled", &err);
        }

        let mut slot = self.slot.lock().await;

        if let Some(session) = slot.as_mut() {
            let reusable = session.track_id == track_id
                && matches!(
                    session.status,
                    CastStatus::Starting | CastStatus::Streaming | CastStatus::Paused
                );
            if reusable {
                info!("Start for active track {}, seeking to {:?}", track_id, seek);
                if title.is_some() {
                    session.title = title;
                }
                session.release_pipeline(SinkClose::Abort).await;
                return self.launch(session, seek).await;
            }
        }

        if let Some(mut previous) = slot.take() {
            info!("Replacing session for {} with {}", previous.track_id, track_id);
            self.set_status(&mut previous, CastStatus::Stopping);
            previous.release_pipeline(SinkClose::Flush).await;
            self.set_status(&mut previous, CastStatus::Finished);
        }

        info!("Starting cast of {} at {:?}", track_id, seek);
        let session = slot.insert(Session::new(track_id.to_string(), title, seek));
        self.emit_status(session);
        self.launch(session, seek).await
    }

    /// Pause: release decoder, pacer and sink but keep the session
    pub async fn pause(&self) -> CastResult {
        let mut slot = self.slot.lock().await;
        let Some(session) = slot.as_mut() else {
            return no_active_stream_failure();
        };

        match session.status {
            CastStatus::Paused => return CastResult::ok("Already paused"),
            CastStatus::Starting | CastStatus::Streaming => {}
            other => {
                let err = Error::InvalidState(format!("cannot pause a {} session", other));
                return CastResult::failed("Nothing to pause", &err);
            }
        }

        self.set_status(session, CastStatus::Stopping);
        session.release_pipeline(SinkClose::Abort).await;
        self.set_status(session, CastStatus::Paused);
        info!("Paused {}", session.track_id);
        CastResult::ok(format!("Paused {}", session.track_id))
    }

    /// Resume a paused session at `seek` (default: last launch offset)
    pub async fn resume(&self, seek: Option<Duration>) -> CastResult {
        let mut slot = self.slot.lock().await;
        let Some(session) = slot.as_mut() else {
            return no_active_stream_failure();
        };

        if session.status != CastStatus::Paused {
            let err = Error::InvalidState(format!("cannot resume a {} session", session.status));
            return CastResult::failed("Stream is not paused", &err);
        }

        let seek = seek.unwrap_or(session.seek_offset);
        info!("Resuming {} at {:?}", session.track_id, seek);
        self.launch(session, seek).await
    }

    /// Seek the active session
    ///
    /// Always reconnects the sink so the server drops audio queued from
    /// before the seek. A paused session only records the new offset.
    pub async fn seek(&self, seek: Duration) -> CastResult {
        let mut slot = self.slot.lock().await;
        let Some(session) = slot.as_mut() else {
            return no_active_stream_failure();
        };

        match session.status {
            CastStatus::Paused => {
                session.seek_offset = seek;
                return CastResult::ok(format!(
                    "Position set to {:.1}s; resume to continue",
                    seek.as_secs_f64()
                ));
            }
            CastStatus::Starting | CastStatus::Streaming | CastStatus::Error => {}
            other => {
                let err = Error::InvalidState(format!("cannot seek a {} session", other));
                return CastResult::failed("Nothing to seek", &err);
            }
        }

        info!("Seeking {} to {:?}", session.track_id, seek);
        self.set_status(session, CastStatus::Stopping);
        session.release_pipeline(SinkClose::Abort).await;
        self.launch(session, seek).await
    }

    /// Stop and clear the session; succeeds when nothing is active
    pub async fn stop(&self) -> CastResult {
        let mut slot = self.slot.lock().await;
        let Some(mut session) = slot.take() else {
            return CastResult::ok("No active stream");
        };

        self.set_status(&mut session, CastStatus::Stopping);
        if let Some(SinkExit::Failed(message)) = session.release_pipeline(SinkClose::Flush).await {
            debug!("Sink did not close cleanly on stop: {}", message);
        }
        self.set_status(&mut session, CastStatus::Finished);
        info!("Stopped {}", session.track_id);
        CastResult::ok(format!("Stopped {}", session.track_id))
    }

    /// Current session status (pure read)
    pub async fn status(&self) -> StatusReport {
        match self.slot.lock().await.as_ref() {
            Some(session) => session.report(self.enabled),
            None => StatusReport::inactive(self.enabled),
        }
    }

    /// Build and attach a pipeline to `session`
    async fn launch(&self, session: &mut Session, seek: Duration) -> CastResult {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        session.seek_offset = seek;
        session.error = None;
        session.generation = generation;
        self.set_status(session, CastStatus::Starting);

        match self.build_pipeline(&session.track_id, seek, generation).await {
            Ok((pipeline, exit_rx)) => {
                let source = pipeline.decoder.source_label();
                let connection = pipeline.sink.id();
                session.pipeline = Some(pipeline);
                self.set_status(session, CastStatus::Streaming);

                tokio::spawn(watch_pipeline(
                    Arc::clone(&self.slot),
                    Arc::clone(&self.state),
                    generation,
                    exit_rx,
                ));

                CastResult::ok(format!(
                    "Streaming {} from {} to {} (connection {})",
                    session.track_id,
                    source,
                    self.sink.addr(),
                    connection
                ))
            }
            Err(e) => {
                error!("Failed to start cast of {}: {}", session.track_id, e);
                fail_session(&self.state, session, e.to_string());
                CastResult::failed(format!("Failed to cast {}: {}", session.track_id, e), &e)
            }
        }
    }

    /// Connect, pick a source, spawn the decoder and wire the pacer
    ///
    /// Stages already built are dropped on error; their `Drop` impls close
    /// the socket and kill child processes.
    async fn build_pipeline(
        &self,
        track_id: &str,
        seek: Duration,
        generation: u64,
    ) -> Result<(Pipeline, oneshot::Receiver<PacerExit>)> {
        let mut sink = SinkConnection::connect(&self.sink).await?;

        let source = match self.cache.get(track_id).await {
            Some(audio) => AudioSource::Cached(audio),
            None => AudioSource::Acquire(self.acquisition.spawn(track_id)?),
        };

        let mut decoder = self.decoder.spawn(source, seek, Arc::clone(&self.cache))?;
        let pcm = decoder.take_stdout().ok_or_else(|| Error::ProcessFailure {
            tool: "decoder",
            message: "decoder output unavailable".to_string(),
        })?;
        let output = sink
            .take_sender()
            .ok_or_else(|| Error::InvalidState("sink input already taken".to_string()))?;

        let (pacer, exit_rx) = Pacer::spawn(pcm, output, self.schedule, self.tick);
        debug!(
            "Pipeline {} wired: decoder pid={:?} -> pacer -> sink connection {}",
            generation,
            decoder.id(),
            sink.id()
        );

        Ok((
            Pipeline {
                generation,
                decoder,
                pacer,
                sink,
            },
            exit_rx,
        ))
    }

    fn set_status(&self, session: &mut Session, status: CastStatus) {
        session.status = status;
        self.emit_status(session);
    }

    fn emit_status(&self, session: &Session) {
        emit_status(&self.state, session);
    }
}

fn no_active_stream_failure() -> CastResult {
    let err = Error::InvalidState("no active stream".to_string());
    CastResult::failed("No active stream", &err)
}

fn emit_status(state: &SharedState, session: &Session) {
    state.broadcast_event(CastEvent::StatusChanged {
        session_id: session.id,
        track_id: session.track_id.clone(),
        status: session.status,
        timestamp: time::now(),
    });
}

fn fail_session(state: &SharedState, session: &mut Session, message: String) {
    session.status = CastStatus::Error;
    session.error = Some(message.clone());
    emit_status(state, session);
    state.broadcast_event(CastEvent::StreamError {
        session_id: session.id,
        track_id: session.track_id.clone(),
        message,
        timestamp: time::now(),
    });
}

/// Wait for a pipeline's pacer to finish and settle the session
///
/// Stale generations (the session was paused, seeked, stopped or replaced
/// since) are ignored.
async fn watch_pipeline(
    slot: SessionSlot,
    state: Arc<SharedState>,
    generation: u64,
    exit_rx: oneshot::Receiver<PacerExit>,
) {
    let exit = match exit_rx.await {
        Ok(PacerExit::Stopped) | Err(_) => return,
        Ok(exit) => exit,
    };

    let mut guard = slot.lock().await;
    let Some(session) = guard.as_mut() else {
        return;
    };
    if session.generation != generation {
        debug!("Ignoring exit of stale pipeline {}", generation);
        return;
    }
    let Some(mut pipeline) = session.pipeline.take() else {
        return;
    };

    session.status = CastStatus::Stopping;
    emit_status(&state, session);

    let finished = match exit {
        PacerExit::Drained { received, released } => {
            let status = pipeline.decoder.reap().await;
            let sink_exit = pipeline.sink.finish().await;

            if received == 0 {
                let err = Error::ProcessFailure {
                    tool: "decoder",
                    message: format!(
                        "no audio produced ({})",
                        pipeline.decoder.failure_message(status)
                    ),
                };
                error!("Cast of {} failed: {}", session.track_id, err);
                fail_session(&state, session, err.to_string());
                false
            } else {
                if let SinkExit::Failed(message) = sink_exit {
                    warn!("Sink close after {} failed: {}", session.track_id, message);
                }
                info!("Finished {} ({} bytes)", session.track_id, released);
                session.status = CastStatus::Finished;
                emit_status(&state, session);
                state.broadcast_event(CastEvent::StreamFinished {
                    session_id: session.id,
                    track_id: session.track_id.clone(),
                    bytes_streamed: released,
                    timestamp: time::now(),
                });
                true
            }
        }
        PacerExit::OutputClosed { released } => {
            let addr = pipeline.sink.addr().to_string();
            let sink_exit = pipeline.sink.finish().await;
            pipeline.decoder.shutdown().await;
            let message = match sink_exit {
                SinkExit::Failed(message) => message,
                SinkExit::Flushed { .. } => "sink closed unexpectedly".to_string(),
            };
            let err = Error::ConnectionFailure { addr, message };
            error!(
                "Cast of {} failed after {} bytes: {}",
                session.track_id, released, err
            );
            fail_session(&state, session, err.to_string());
            false
        }
        PacerExit::Stopped => false,
    };

    if finished {
        *guard = None;
    }
}
