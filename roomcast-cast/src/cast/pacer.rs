//! Realtime pacing transform
//!
//! A decoder working from an in-memory source converts a whole track in well
//! under a second. Forwarding that output as fast as it arrives would hand the
//! multi-room server the entire track at once, so the pacer buffers everything
//! the decoder produces and releases it on a fixed tick at the rate the audio
//! plays back, plus a small lead so the server never runs dry between ticks.
//!
//! Completion is reported only after end-of-data has been seen, the queue is
//! empty, and wall-clock time has caught up with the audio released. Stopping
//! early discards the queue and reports `Stopped` at once.

use super::format::PcmFormat;
use crate::config::PacingConfig;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Read size for pulling decoder output
const READ_CHUNK_BYTES: usize = 64 * 1024;

/// Byte budget per tick as a pure function of elapsed time
#[derive(Debug, Clone, Copy)]
pub struct PacingSchedule {
    format: PcmFormat,
    lead_bytes: u64,
    max_tick_bytes: usize,
}

impl PacingSchedule {
    pub fn new(format: PcmFormat, lead: Duration, max_tick_bytes: usize) -> Self {
        Self {
            format,
            lead_bytes: format.bytes_for(lead) as u64,
            max_tick_bytes: format.align_down(max_tick_bytes).max(format.frame_bytes()),
        }
    }

    pub fn from_config(format: PcmFormat, config: &PacingConfig) -> Self {
        Self::new(format, config.lead(), config.max_tick_bytes)
    }

    /// Total bytes that may have been released after `elapsed`
    pub fn target_bytes(&self, elapsed: Duration) -> u64 {
        elapsed.as_millis() as u64 * self.format.bytes_per_second() / 1000 + self.lead_bytes
    }

    /// Bytes to release on a tick
    ///
    /// `min(target - released, queued, per-tick cap)`, rounded down to whole
    /// frames. The unaligned tail of a finished stream goes out whole once it
    /// fits the budget.
    pub fn release_budget(
        &self,
        elapsed: Duration,
        released: u64,
        queued: usize,
        end_of_data: bool,
    ) -> usize {
        let due = self.target_bytes(elapsed).saturating_sub(released);
        let budget = due.min(queued as u64).min(self.max_tick_bytes as u64) as usize;
        if end_of_data && budget == queued {
            budget
        } else {
            self.format.align_down(budget)
        }
    }

    /// Wall-clock time by which `released` bytes have played out
    pub fn playout_deadline(&self, released: u64) -> Duration {
        self.format.duration_of(released)
    }

}

/// FIFO of received chunks
#[derive(Default)]
struct PacingBuffer {
    chunks: VecDeque<Vec<u8>>,
    /// Bytes of the front chunk already released
    front_offset: usize,
    queued: usize,
}

impl PacingBuffer {
    fn push(&mut self, chunk: Vec<u8>) {
        self.queued += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Remove exactly `n` bytes (n <= queued) from the front
    fn take(&mut self, n: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let available = &front[self.front_offset..];
            let wanted = n - out.len();
            if available.len() <= wanted {
                out.extend_from_slice(available);
                self.chunks.pop_front();
                self.front_offset = 0;
            } else {
                out.extend_from_slice(&available[..wanted]);
                self.front_offset += wanted;
            }
        }
        self.queued -= out.len();
        out
    }

    fn queued(&self) -> usize {
        self.queued
    }

    fn is_empty(&self) -> bool {
        self.queued == 0
    }
}

/// Live counters shared with the engine
#[derive(Debug, Default)]
pub struct PacerStats {
    released: AtomicU64,
}

impl PacerStats {
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

/// How a pacer finished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacerExit {
    /// End of data reached and everything played out
    Drained { received: u64, released: u64 },
    /// Downstream receiver went away
    OutputClosed { released: u64 },
    /// `stop()` was called
    Stopped,
}

type ExitSlot = Arc<Mutex<Option<oneshot::Sender<PacerExit>>>>;

fn resolve(slot: &ExitSlot, exit: PacerExit) {
    let sender = match slot.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(tx) = sender {
        let _ = tx.send(exit);
    }
}

/// Running pacing transform
pub struct Pacer {
    task: JoinHandle<()>,
    stats: Arc<PacerStats>,
    exit: ExitSlot,
}

impl Pacer {
    /// Start pacing `input` into `output`
    ///
    /// The tick begins with the first received chunk. The returned receiver
    /// resolves exactly once with the pacer's exit.
    pub fn spawn<R>(
        input: R,
        output: mpsc::Sender<Vec<u8>>,
        schedule: PacingSchedule,
        tick: Duration,
    ) -> (Pacer, oneshot::Receiver<PacerExit>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let stats = Arc::new(PacerStats::default());
        let (exit_tx, exit_rx) = oneshot::channel();
        let exit: ExitSlot = Arc::new(Mutex::new(Some(exit_tx)));

        let task_stats = Arc::clone(&stats);
        let task_exit = Arc::clone(&exit);
        let task = tokio::spawn(async move {
            let result = run(input, output, schedule, tick, &task_stats).await;
            resolve(&task_exit, result);
        });

        (Pacer { task, stats, exit }, exit_rx)
    }

    /// Cancel the tick, discard queued audio and resolve completion as `Stopped`
    pub fn stop(&self) {
        resolve(&self.exit, PacerExit::Stopped);
        self.task.abort();
    }

    pub fn stats(&self) -> Arc<PacerStats> {
        Arc::clone(&self.stats)
    }
}

impl Drop for Pacer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn run<R>(
    mut input: R,
    output: mpsc::Sender<Vec<u8>>,
    schedule: PacingSchedule,
    tick: Duration,
    stats: &PacerStats,
) -> PacerExit
where
    R: AsyncRead + Unpin,
{
    let mut buffer = PacingBuffer::default();
    let mut read_buf = vec![0u8; READ_CHUNK_BYTES];
    let mut input_open = true;
    let mut started: Option<Instant> = None;
    let mut ticker: Option<Interval> = None;
    let mut received: u64 = 0;
    let mut released: u64 = 0;

    loop {
        tokio::select! {
            read = input.read(&mut read_buf), if input_open => {
                match read {
                    Ok(0) => {
                        input_open = false;
                        debug!("Pacer input finished after {} bytes", received);
                        if started.is_none() {
                            return PacerExit::Drained { received: 0, released: 0 };
                        }
                    }
                    Ok(n) => {
                        buffer.push(read_buf[..n].to_vec());
                        received += n as u64;
                        if started.is_none() {
                            started = Some(Instant::now());
                            let mut t = interval(tick);
                            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                            ticker = Some(t);
                        }
                    }
                    Err(e) => {
                        warn!("Pacer input read failed, treating as end of data: {}", e);
                        input_open = false;
                        if started.is_none() {
                            return PacerExit::Drained { received: 0, released: 0 };
                        }
                    }
                }
            }

            _ = next_tick(&mut ticker), if started.is_some() => {
                let elapsed = started.map(|s| s.elapsed()).unwrap_or_default();
                let budget = schedule.release_budget(elapsed, released, buffer.queued(), !input_open);

                if budget > 0 {
                    let chunk = buffer.take(budget);
                    if output.send(chunk).await.is_err() {
                        debug!("Pacer output closed after {} bytes", released);
                        return PacerExit::OutputClosed { released };
                    }
                    released += budget as u64;
                    stats.released.store(released, Ordering::Relaxed);
                }

                if !input_open && buffer.is_empty() && elapsed >= schedule.playout_deadline(released) {
                    debug!("Pacer drained: {} bytes over {:?}", released, elapsed);
                    return PacerExit::Drained { received, released };
                }
            }
        }
    }
}
