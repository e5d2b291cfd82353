//! Casting pipeline
//!
//! Track id → audio cache or acquisition process → decoder process →
//! real-time pacer → TCP sink, driven by the single-session [`CastEngine`].

pub mod acquisition;
pub mod cache;
pub mod decoder;
pub mod durable;
pub mod engine;
pub mod format;
pub mod pacer;
pub mod process;
pub mod session;
pub mod sink;

pub use cache::{AudioCache, CacheSummary};
pub use engine::CastEngine;
pub use format::PcmFormat;
pub use session::{CastResult, StatusReport};
