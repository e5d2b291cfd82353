//! Audio source cache
//!
//! Whole-track compressed audio, looked up in a bounded in-process table first
//! and then in the optional durable cache. A durable hit is copied into the
//! in-process table. Eviction follows insertion order only: reading an entry
//! does not protect it.

use super::durable::DurableCache;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Bounded insertion-ordered table
struct MemoryCache {
    capacity: usize,
    order: VecDeque<String>,
    entries: HashMap<String, Arc<Vec<u8>>>,
}

impl MemoryCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    fn get(&self, track_id: &str) -> Option<Arc<Vec<u8>>> {
        self.entries.get(track_id).cloned()
    }

    /// Insert, evicting the oldest entry when full. Returns the evicted key.
    fn insert(&mut self, track_id: &str, audio: Arc<Vec<u8>>) -> Option<String> {
        if let Some(existing) = self.entries.get_mut(track_id) {
            // Replacement keeps the original insertion position
            *existing = audio;
            return None;
        }

        let mut evicted = None;
        if self.entries.len() >= self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
                evicted = Some(oldest);
            }
        }

        self.order.push_back(track_id.to_string());
        self.entries.insert(track_id.to_string(), audio);
        evicted
    }
}

/// One in-process entry in a cache summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTrack {
    pub track_id: String,
    pub bytes: usize,
}

/// Snapshot of the cache for the status API
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    pub capacity: usize,
    pub durable: bool,
    /// Oldest first
    pub entries: Vec<CachedTrack>,
}

/// Two-level audio source cache
pub struct AudioCache {
    memory: Mutex<MemoryCache>,
    durable: Option<DurableCache>,
}

impl AudioCache {
    pub fn new(capacity: usize, durable: Option<DurableCache>) -> Self {
        Self {
            memory: Mutex::new(MemoryCache::new(capacity)),
            durable,
        }
    }

    /// In-process only cache
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(capacity, None)
    }

    fn memory(&self) -> std::sync::MutexGuard<'_, MemoryCache> {
        match self.memory.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Look up a track, falling back to the durable cache
    ///
    /// Durable-cache errors are logged and treated as a miss.
    pub async fn get(&self, track_id: &str) -> Option<Arc<Vec<u8>>> {
        let cached = self.memory().get(track_id);
        if let Some(audio) = cached {
            debug!("Audio cache hit (memory) for {}", track_id);
            return Some(audio);
        }

        let durable = self.durable.as_ref()?;
        match durable.get(track_id).await {
            Ok(Some(bytes)) => {
                debug!("Audio cache hit (durable) for {} ({} bytes)", track_id, bytes.len());
                let audio = Arc::new(bytes);
                let evicted = self.memory().insert(track_id, Arc::clone(&audio));
                if let Some(evicted) = evicted {
                    debug!("Evicted {} from audio cache", evicted);
                }
                Some(audio)
            }
            Ok(None) => {
                debug!("Audio cache miss for {}", track_id);
                None
            }
            Err(e) => {
                warn!("Durable cache lookup for {} failed: {}", track_id, e);
                None
            }
        }
    }

    /// Store a fully acquired track in both levels
    pub async fn put(&self, track_id: &str, audio: Vec<u8>) -> Arc<Vec<u8>> {
        let audio = Arc::new(audio);
        let evicted = self.memory().insert(track_id, Arc::clone(&audio));
        if let Some(evicted) = evicted {
            debug!("Evicted {} from audio cache", evicted);
        }

        if let Some(durable) = &self.durable {
            if audio.len() < durable.min_valid_bytes() {
                debug!(
                    "Not persisting {}: {} bytes is below the durable minimum",
                    track_id,
                    audio.len()
                );
            } else if let Err(e) = durable.set(track_id, &audio).await {
                warn!("Durable cache write for {} failed: {}", track_id, e);
            }
        }

        audio
    }

    /// Smallest acquisition worth caching; shorter output is a failed download
    pub fn min_track_bytes(&self) -> usize {
        self.durable
            .as_ref()
            .map_or(1, DurableCache::min_valid_bytes)
            .max(1)
    }

    /// In-process lookup only (no I/O)
    pub fn contains(&self, track_id: &str) -> bool {
        self.memory().entries.contains_key(track_id)
    }

    pub fn len(&self) -> usize {
        self.memory().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn summary(&self) -> CacheSummary {
        let memory = self.memory();
        CacheSummary {
            capacity: memory.capacity,
            durable: self.durable.is_some(),
            entries: memory
                .order
                .iter()
                .map(|id| CachedTrack {
                    track_id: id.clone(),
                    bytes: memory.entries.get(id).map_or(0, |a| a.len()),
                })
                .collect(),
        }
    }
}
