//! Origin access layer.
//!
//! This crate provides:
//! - `OriginClient` - HEAD and streaming GET against the origin
//! - `ReqwestOrigin` - reqwest-backed client with bounded waits
//! - `TimeoutConfig` - Connect, response and idle timeouts

mod client;
mod timeout;

pub use client::*;
pub use timeout::*;
