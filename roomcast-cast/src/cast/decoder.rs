//! Decoder process manager
//!
//! Spawns the external decoder (compressed audio on stdin, raw PCM on stdout)
//! and feeds it either cached bytes or the output of a running acquisition
//! process. The acquisition output is moved through a bounded chunk queue so
//! a slow decoder back-pressures the download instead of growing a buffer.
//! A download that completes successfully is written to the audio cache.

use super::acquisition::AcquisitionProcess;
use super::cache::AudioCache;
use super::format::PcmFormat;
use super::process::{describe_exit, ManagedChild};
use crate::config::DecoderConfig;
use crate::error::{Error, Result};
use std::process::ExitStatus;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Chunks buffered between acquisition stdout and decoder stdin
const FEED_QUEUE_DEPTH: usize = 16;

/// Read size for acquisition output
const FEED_CHUNK_BYTES: usize = 64 * 1024;

/// Where the decoder's compressed input comes from
pub enum AudioSource {
    /// Complete track from the audio cache
    Cached(Arc<Vec<u8>>),
    /// Live download, cached once it completes
    Acquire(AcquisitionProcess),
}

impl AudioSource {
    pub fn label(&self) -> &'static str {
        match self {
            AudioSource::Cached(_) => "cache",
            AudioSource::Acquire(_) => "acquisition",
        }
    }
}

/// Configured decoder command
#[derive(Debug, Clone)]
pub struct Decoder {
    program: String,
    format: PcmFormat,
    kill_grace: Duration,
}

impl Decoder {
    pub fn new(program: impl Into<String>, format: PcmFormat, kill_grace: Duration) -> Self {
        Self {
            program: program.into(),
            format,
            kill_grace,
        }
    }

    pub fn from_config(config: &DecoderConfig, format: PcmFormat) -> Self {
        Self::new(config.program.clone(), format, config.kill_grace())
    }


    /// Decoder arguments; a non-zero `seek` starts output at that offset
    pub fn args(&self, seek: Duration) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        if !seek.is_zero() {
            args.push("-ss".to_string());
            args.push(format!("{:.3}", seek.as_secs_f64()));
        }

        args.extend(
            [
                "-i".to_string(),
                "pipe:0".to_string(),
                "-f".to_string(),
                self.format.ffmpeg_format().to_string(),
                "-acodec".to_string(),
                self.format.ffmpeg_codec().to_string(),
                "-ar".to_string(),
                self.format.sample_rate.to_string(),
                "-ac".to_string(),
                self.format.channels.to_string(),
                "pipe:1".to_string(),
            ],
        );
        args
    }

    /// Spawn the decoder and start feeding it from `source`
    ///
    /// On failure the source is dropped, which kills a running acquisition.
    pub fn spawn(
        &self,
        source: AudioSource,
        seek: Duration,
        cache: Arc<AudioCache>,
    ) -> Result<DecoderProcess> {
        let mut child = ManagedChild::spawn("decoder", &self.program, &self.args(seek), true)?;
        let stdin = child.take_stdin().ok_or_else(|| Error::ProcessFailure {
            tool: "decoder",
            message: "stdin not captured".to_string(),
        })?;
        let stdout = child.take_stdout().ok_or_else(|| Error::ProcessFailure {
            tool: "decoder",
            message: "stdout not captured".to_string(),
        })?;

        info!(
            "Decoder started from {} at {:.3}s (pid={:?})",
            source.label(),
            seek.as_secs_f64(),
            child.id()
        );

        let source_label = source.label();
        let acquisition_error = Arc::new(Mutex::new(None));
        let feeders = match source {
            AudioSource::Cached(audio) => vec![tokio::spawn(feed_cached(audio, stdin))],
            AudioSource::Acquire(acquisition) => {
                let (tx, rx) = mpsc::channel(FEED_QUEUE_DEPTH);
                vec![
                    tokio::spawn(pump_acquisition(
                        acquisition,
                        tx,
                        cache,
                        Arc::clone(&acquisition_error),
                    )),
                    tokio::spawn(feed_queue(rx, stdin)),
                ]
            }
        };

        Ok(DecoderProcess {
            child,
            stdout: Some(stdout),
            feeders,
            kill_grace: self.kill_grace,
            source_label,
            acquisition_error,
        })
    }
}

/// Running decoder and its input feeders
pub struct DecoderProcess {
    child: ManagedChild,
    stdout: Option<ChildStdout>,
    feeders: Vec<JoinHandle<()>>,
    kill_grace: Duration,
    source_label: &'static str,
    acquisition_error: Arc<Mutex<Option<String>>>,
}

impl DecoderProcess {
    /// Raw PCM output; taken once by the pacer
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.stdout.take()
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub fn source_label(&self) -> &'static str {
        self.source_label
    }

    /// Failure reported by the acquisition process, if it failed
    pub fn acquisition_error(&self) -> Option<String> {
        match self.acquisition_error.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Describe why the decoder produced nothing
    pub fn failure_message(&self, status: Option<ExitStatus>) -> String {
        let decoder = describe_exit(status, &self.child.stderr_tail());
        match self.acquisition_error() {
            Some(acquisition) => format!("decoder {}; acquisition {}", decoder, acquisition),
            None => format!("decoder {}", decoder),
        }
    }

    /// Stop feeding, close pipes and terminate the decoder (and any download)
    pub async fn shutdown(&mut self) -> Option<ExitStatus> {
        for feeder in self.feeders.drain(..) {
            feeder.abort();
        }
        self.stdout = None;
        let status = self.child.terminate(self.kill_grace).await;
        debug!("Decoder shut down: {:?}", status);
        status
    }

    /// Collect the exit status after output reached end-of-data
    ///
    /// Feeders are left to finish so a completed download is still cached.
    pub async fn reap(&mut self) -> Option<ExitStatus> {
        // Detach rather than abort
        self.feeders.clear();
        self.stdout = None;
        let status = self.child.settle(self.kill_grace).await;
        if let Some(status) = status {
            if !status.success() {
                // Advisory only: decoders often exit non-zero after flushing everything
                warn!(
                    "Decoder exited with {} ({})",
                    status,
                    self.child.stderr_tail()
                );
            }
        }
        status
    }
}

impl Drop for DecoderProcess {
    fn drop(&mut self) {
        for feeder in &self.feeders {
            if !feeder.is_finished() {
                feeder.abort();
            }
        }
    }
}

async fn feed_cached(audio: Arc<Vec<u8>>, mut stdin: ChildStdin) {
    match stdin.write_all(&audio).await {
        Ok(()) => debug!("Fed {} cached bytes to decoder", audio.len()),
        // Decoder closed its input early (killed or seeked past the end)
        Err(e) => debug!("Decoder input closed while feeding cache: {}", e),
    }
    let _ = stdin.shutdown().await;
}

async fn feed_queue(mut rx: mpsc::Receiver<Vec<u8>>, mut stdin: ChildStdin) {
    let mut fed = 0usize;
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = stdin.write_all(&chunk).await {
            debug!("Decoder input closed after {} bytes: {}", fed, e);
            return;
        }
        fed += chunk.len();
    }
    debug!("Acquisition finished, closing decoder input after {} bytes", fed);
    let _ = stdin.shutdown().await;
}

async fn pump_acquisition(
    mut acquisition: AcquisitionProcess,
    tx: mpsc::Sender<Vec<u8>>,
    cache: Arc<AudioCache>,
    failure: Arc<Mutex<Option<String>>>,
) {
    let mut downloaded = Vec::new();
    let mut buf = vec![0u8; FEED_CHUNK_BYTES];
    let mut forward = true;

    loop {
        match acquisition.stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                downloaded.extend_from_slice(&buf[..n]);
                if forward && tx.send(buf[..n].to_vec()).await.is_err() {
                    // Keep downloading so the complete track can still be cached
                    forward = false;
                }
            }
            Err(e) => {
                warn!("Reading acquisition output for {} failed: {}", acquisition.track_id, e);
                break;
            }
        }
    }
    drop(tx);

    let status = acquisition.child.wait().await.ok();
    match status {
        Some(status) if status.success() && downloaded.len() >= cache.min_track_bytes() => {
            info!(
                "Acquired {} ({} bytes), caching",
                acquisition.track_id,
                downloaded.len()
            );
            cache.put(&acquisition.track_id, downloaded).await;
        }
        _ => {
            let message = describe_exit(status, &acquisition.child.stderr_tail());
            warn!(
                "Acquisition of {} failed after {} bytes: {}",
                acquisition.track_id,
                downloaded.len(),
                message
            );
            let mut slot = match failure.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = Some(message);
        }
    }
}
