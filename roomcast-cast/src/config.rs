//! roomcast-cast specific configuration
//!
//! Loaded from an optional TOML file (see `roomcast_common::config`) and then
//! overridden by command-line arguments / environment variables in `main`.
//! Every field has a compiled default so an empty file is a valid config.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Casting service configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub cast: CastConfig,
    pub sink: SinkConfig,
    pub decoder: DecoderConfig,
    pub acquisition: AcquisitionConfig,
    pub cache: CacheConfig,
    pub pacing: PacingConfig,
}

/// HTTP control surface
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 5750 }
    }
}

/// Global cast switch
///
/// When disabled the engine rejects start requests; status still answers.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CastConfig {
    pub enabled: bool,
}

impl Default for CastConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Multi-room server raw-stream ingestion endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SinkConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    /// Silence written before closing at end of track
    pub silence_ms: u64,
    /// Forced-close guard for the final flush
    pub close_timeout_ms: u64,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4953,
            connect_timeout_ms: 4000,
            silence_ms: 300,
            close_timeout_ms: 2000,
        }
    }
}

impl SinkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn silence(&self) -> Duration {
        Duration::from_millis(self.silence_ms)
    }
}

/// External decoder process
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub program: String,
    /// Grace period between terminate request and forced kill
    pub kill_grace_ms: u64,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            kill_grace_ms: 2000,
        }
    }
}

impl DecoderConfig {
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

/// External source acquisition tool
///
/// `{id}` in any argument is replaced by the track identifier.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            args: vec![
                "--quiet".to_string(),
                "--no-warnings".to_string(),
                "-f".to_string(),
                "bestaudio".to_string(),
                "-o".to_string(),
                "-".to_string(),
                "https://www.youtube.com/watch?v={id}".to_string(),
            ],
        }
    }
}

/// Audio source cache
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// In-process capacity in tracks
    pub capacity: usize,
    /// SQLite file for the durable cache (disabled when unset)
    pub db_path: Option<PathBuf>,
    pub ttl_secs: u64,
    /// Durable values shorter than this are treated as corrupt placeholders
    pub min_valid_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 5,
            db_path: None,
            ttl_secs: 7 * 24 * 60 * 60,
            min_valid_bytes: 1024,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Realtime pacing transform
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PacingConfig {
    pub tick_ms: u64,
    /// Audio released ahead of the wall clock
    pub lead_ms: u64,
    /// Upper bound on bytes released in a single tick
    pub max_tick_bytes: usize,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            lead_ms: 500,
            max_tick_bytes: 256 * 1024,
        }
    }
}

impl PacingConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn lead(&self) -> Duration {
        Duration::from_millis(self.lead_ms)
    }
}

impl Config {
    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache.capacity == 0 {
            return Err(Error::Config("cache.capacity must be at least 1".to_string()));
        }
        if self.pacing.tick_ms == 0 {
            return Err(Error::Config("pacing.tick_ms must be greater than 0".to_string()));
        }
        if self.pacing.max_tick_bytes < 4 {
            return Err(Error::Config(
                "pacing.max_tick_bytes must hold at least one frame".to_string(),
            ));
        }
        if self.sink.host.is_empty() {
            return Err(Error::Config("sink.host must not be empty".to_string()));
        }
        if self.decoder.program.is_empty() || self.acquisition.program.is_empty() {
            return Err(Error::Config("decoder and acquisition programs must be set".to_string()));
        }
        Ok(())
    }

    /// Sink address as `host:port`
    pub fn sink_addr(&self) -> String {
        format!("{}:{}", self.sink.host, self.sink.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sink_addr(), "127.0.0.1:4953");
        assert_eq!(config.cache.capacity, 5);
        assert_eq!(config.pacing.tick(), Duration::from_millis(50));
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [sink]
            host = "snapserver.lan"

            [cache]
            capacity = 2
            db_path = "/var/lib/roomcast/cache.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.sink.host, "snapserver.lan");
        assert_eq!(config.sink.port, 4953);
        assert_eq!(config.cache.capacity, 2);
        assert_eq!(config.cache.ttl_secs, 604_800);
        assert_eq!(config.decoder.program, "ffmpeg");
        assert!(config.cast.enabled);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = Config::default();
        config.cache.capacity = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_tick_rejected() {
        let mut config = Config::default();
        config.pacing.tick_ms = 0;
        assert!(config.validate().is_err());
    }
}
