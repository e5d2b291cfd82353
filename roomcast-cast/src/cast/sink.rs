//! Audio sink: raw PCM over TCP to the multi-room server
//!
//! One connection per pipeline. The server buffers what it receives, so seek
//! and resume always open a fresh connection rather than reuse one that may
//! still have stale audio queued behind it.
//!
//! A graceful close writes a short burst of silence so the server's pipeline
//! flushes cleanly, then half-closes the socket. A forced-close timer bounds
//! the whole sequence.

use super::format::PcmFormat;
use crate::config::SinkConfig;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Chunks queued between pacer and socket
const SINK_QUEUE_DEPTH: usize = 8;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection parameters
#[derive(Debug, Clone)]
pub struct SinkSettings {
    pub host: String,
    pub port: u16,
    pub connect_timeout: Duration,
    pub close_timeout: Duration,
    pub silence: Duration,
    pub format: PcmFormat,
}

impl SinkSettings {
    pub fn from_config(config: &SinkConfig, format: PcmFormat) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout(),
            close_timeout: config.close_timeout(),
            silence: config.silence(),
            format,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// How a sink connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkExit {
    /// All audio plus trailing silence written, socket half-closed
    Flushed { bytes: u64 },
    /// Socket error or forced close
    Failed(String),
}

/// Open connection and its writer task
pub struct SinkConnection {
    id: u64,
    addr: String,
    tx: Option<mpsc::Sender<Vec<u8>>>,
    task: JoinHandle<SinkExit>,
    close_timeout: Duration,
}

impl SinkConnection {
    /// Connect within the configured timeout
    pub async fn connect(settings: &SinkSettings) -> Result<SinkConnection> {
        let addr = settings.addr();
        let stream = match tokio::time::timeout(settings.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(Error::ConnectionFailure {
                    addr,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(Error::ConnectionFailure {
                    addr,
                    message: format!("connect timed out after {:?}", settings.connect_timeout),
                })
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY on sink: {}", e);
        }

        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        info!("Sink connection {} opened to {}", id, addr);

        let (tx, rx) = mpsc::channel(SINK_QUEUE_DEPTH);
        let silence = settings.format.silence(settings.silence);
        let task = tokio::spawn(write_loop(id, stream, rx, silence));

        Ok(SinkConnection {
            id,
            addr,
            tx: Some(tx),
            task,
            close_timeout: settings.close_timeout,
        })
    }

    /// Process-unique connection id
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Take the input side; the stream ends once every sender is dropped
    pub fn take_sender(&mut self) -> Option<mpsc::Sender<Vec<u8>>> {
        self.tx.take()
    }

    /// Flush silence and half-close once the input side has been dropped
    ///
    /// Gives up and drops the socket after the close timeout.
    pub async fn finish(mut self) -> SinkExit {
        self.tx = None;
        match tokio::time::timeout(self.close_timeout, &mut self.task).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(e)) => SinkExit::Failed(format!("sink writer ended abnormally: {}", e)),
            Err(_) => {
                warn!(
                    "Sink connection {} did not close within {:?}, forcing",
                    self.id, self.close_timeout
                );
                self.task.abort();
                SinkExit::Failed("forced close".to_string())
            }
        }
    }

    /// Drop the connection immediately, discarding anything unsent
    pub fn abort(self) {
        debug!("Sink connection {} closed", self.id);
        self.task.abort();
    }
}

impl Drop for SinkConnection {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn write_loop(
    id: u64,
    mut stream: TcpStream,
    mut rx: mpsc::Receiver<Vec<u8>>,
    silence: Vec<u8>,
) -> SinkExit {
    let mut written = 0u64;
    while let Some(chunk) = rx.recv().await {
        if let Err(e) = stream.write_all(&chunk).await {
            warn!("Sink connection {} write failed: {}", id, e);
            return SinkExit::Failed(e.to_string());
        }
        written += chunk.len() as u64;
    }

    if let Err(e) = stream.write_all(&silence).await {
        warn!("Sink connection {} failed writing trailing silence: {}", id, e);
        return SinkExit::Failed(e.to_string());
    }
    if let Err(e) = stream.shutdown().await {
        debug!("Sink connection {} shutdown: {}", id, e);
    }

    info!("Sink connection {} flushed after {} bytes", id, written);
    SinkExit::Flushed { bytes: written }
}
