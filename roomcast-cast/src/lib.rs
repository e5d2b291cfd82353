//! # roomcast Casting Service Library (roomcast-cast)
//!
//! Streams a track to a multi-room audio server as real-time raw PCM.
//!
//! **Pipeline:** cached audio or acquisition process → decoder process →
//! pacer (real-time release with a small lead) → TCP sink
//!
//! **Control:** one session at a time, driven over HTTP with SSE status events.

pub mod api;
pub mod cast;
pub mod config;
pub mod error;
pub mod state;

pub use error::{Error, Result};
pub use state::SharedState;
