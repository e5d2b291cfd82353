//! HTTP control surface
//!
//! axum router, JSON handlers and the SSE event stream.

pub mod handlers;
pub mod server;
pub mod sse;

pub use server::{create_router, AppContext};
