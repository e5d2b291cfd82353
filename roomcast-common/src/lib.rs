//! # roomcast Common Library
//!
//! Shared code for the roomcast services including:
//! - Event types (CastEvent enum) and session status
//! - Configuration file resolution and TOML loading
//! - Common error type
//! - Timestamp utilities

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{CastEvent, CastStatus};
