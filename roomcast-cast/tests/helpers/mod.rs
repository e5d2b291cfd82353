//! Shared fixtures for roomcast-cast integration tests
//!
//! - `StubServer`: local TCP listener standing in for the multi-room server;
//!   records byte counts, trailing silence and accept/close order
//! - `StubTools`: shell-script decoder and acquisition executables that log
//!   their arguments and emit a fixed amount of output

#![allow(dead_code)]

use roomcast_cast::cast::CastEngine;
use roomcast_cast::config::Config;
use roomcast_cast::SharedState;
use roomcast_common::CastEvent;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Bytes per second of CD-quality PCM
pub const PCM_BYTES_PER_SEC: usize = 176_400;

/// Trailing silence the tests configure (100 ms)
pub const SILENCE_MS: u64 = 100;
pub const SILENCE_BYTES: usize = 17_640;

/// One accepted sink connection
#[derive(Debug, Default, Clone)]
pub struct Received {
    pub bytes: usize,
    /// Length of the zero-byte run at the end of the stream so far
    pub trailing_zeros: usize,
    pub closed: bool,
    /// Position of this accept in the server's event order
    pub accepted_seq: u64,
    /// Position of the first audio chunk in the same order
    pub first_data_seq: Option<u64>,
    /// Position of this connection's EOF in the same order
    pub closed_seq: Option<u64>,
}

impl Received {
    fn record(&mut self, chunk: &[u8], sequence: &AtomicU64) {
        if self.first_data_seq.is_none() {
            self.first_data_seq = Some(sequence.fetch_add(1, Ordering::SeqCst));
        }
        self.bytes += chunk.len();
        match chunk.iter().rposition(|&b| b != 0) {
            Some(last) => self.trailing_zeros = chunk.len() - last - 1,
            None => self.trailing_zeros += chunk.len(),
        }
    }
}

/// Records every connection and how many bytes arrived on it
pub struct StubServer {
    port: u16,
    connections: Arc<Mutex<Vec<Received>>>,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn start() -> Self {
        Self::start_with(None).await
    }

    /// Server that drops each connection once `limit` bytes have arrived
    pub async fn start_closing_after(limit: usize) -> Self {
        Self::start_with(Some(limit)).await
    }

    async fn start_with(limit: Option<usize>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let connections: Arc<Mutex<Vec<Received>>> = Arc::new(Mutex::new(Vec::new()));
        let sequence = Arc::new(AtomicU64::new(0));

        let accepted = Arc::clone(&connections);
        let task = tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let index = {
                    let mut conns = accepted.lock().unwrap();
                    conns.push(Received {
                        accepted_seq: sequence.fetch_add(1, Ordering::SeqCst),
                        ..Received::default()
                    });
                    conns.len() - 1
                };
                let conns = Arc::clone(&accepted);
                let sequence = Arc::clone(&sequence);
                tokio::spawn(async move {
                    let mut buf = vec![0u8; 64 * 1024];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                let total = {
                                    let mut conns = conns.lock().unwrap();
                                    conns[index].record(&buf[..n], &sequence);
                                    conns[index].bytes
                                };
                                if limit.is_some_and(|limit| total >= limit) {
                                    break;
                                }
                            }
                        }
                    }
                    drop(socket);
                    let mut conns = conns.lock().unwrap();
                    conns[index].closed = true;
                    conns[index].closed_seq = Some(sequence.fetch_add(1, Ordering::SeqCst));
                });
            }
        });

        Self {
            port,
            connections,
            task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connections(&self) -> Vec<Received> {
        self.connections.lock().unwrap().clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Wait until `index` has seen EOF or reset
    pub async fn wait_closed(&self, index: usize, timeout: Duration) -> Received {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(conn) = self.connections().get(index) {
                if conn.closed {
                    return conn.clone();
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "connection {} not closed within {:?}: {:?}",
                index,
                timeout,
                self.connections()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait until `index` has received its first bytes
    pub async fn wait_for_data(&self, index: usize, timeout: Duration) -> Received {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(conn) = self.connections().get(index) {
                if conn.bytes > 0 {
                    return conn.clone();
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "connection {} received nothing within {:?}",
                index,
                timeout
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Wait until at least `count` connections were accepted
    pub async fn wait_connections(&self, count: usize, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.connection_count() < count {
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {} connections, saw {}",
                count,
                self.connection_count()
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Port with nothing listening on it
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Stub decoder and acquisition scripts in a temp dir
#[cfg(unix)]
pub struct StubTools {
    dir: TempDir,
    pub decoder: PathBuf,
    pub acquisition: PathBuf,
}

#[cfg(unix)]
impl StubTools {
    /// Decoder emits `decoded_bytes` of non-zero audio after consuming its
    /// input, so padding silence stays distinguishable; acquisition emits
    /// `acquired_bytes`
    pub fn new(decoded_bytes: usize, acquired_bytes: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();

        let decoder_log = dir.path().join("decoder.log");
        let decoder = dir.path().join("fake-decoder");
        write_script(
            &decoder,
            &format!(
                "#!/bin/sh\necho \"$@\" >> '{}'\ncat > /dev/null\nhead -c {} /dev/zero | tr '\\000' 'Z'\n",
                decoder_log.display(),
                decoded_bytes
            ),
        );

        let acquisition_log = dir.path().join("acquisition.log");
        let acquisition = dir.path().join("fake-acquire");
        write_script(
            &acquisition,
            &format!(
                "#!/bin/sh\necho \"$@\" >> '{}'\nhead -c {} /dev/zero\n",
                acquisition_log.display(),
                acquired_bytes
            ),
        );

        Self {
            dir,
            decoder,
            acquisition,
        }
    }

    /// One line per decoder invocation
    pub fn decoder_calls(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("decoder.log"))
    }

    /// One line per acquisition invocation
    pub fn acquisition_calls(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("acquisition.log"))
    }

    /// Config pointing at these stubs and `sink_port`
    pub fn config(&self, sink_port: u16) -> Config {
        let mut config = Config::default();
        config.sink.host = "127.0.0.1".to_string();
        config.sink.port = sink_port;
        config.sink.connect_timeout_ms = 1000;
        config.sink.silence_ms = SILENCE_MS;
        config.sink.close_timeout_ms = 2000;
        config.decoder.program = self.decoder.to_string_lossy().to_string();
        config.decoder.kill_grace_ms = 200;
        config.acquisition.program = self.acquisition.to_string_lossy().to_string();
        config.acquisition.args = vec!["--id".to_string(), "{id}".to_string()];
        config.pacing.tick_ms = 20;
        config
    }
}

#[cfg(unix)]
fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Engine with an in-memory cache and its event receiver
pub async fn engine_for(config: &Config) -> (Arc<CastEngine>, broadcast::Receiver<CastEvent>) {
    let state = Arc::new(SharedState::new());
    let events = state.subscribe_events();
    let engine = Arc::new(CastEngine::from_config(config, state).await.unwrap());
    (engine, events)
}

/// Wait for the first event matching `pred`
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<CastEvent>,
    timeout: Duration,
    pred: F,
) -> CastEvent
where
    F: Fn(&CastEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
