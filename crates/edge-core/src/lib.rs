//! Core abstractions for the edge caching proxy.
//!
//! This crate provides the fundamental types shared by every other crate:
//! - `OriginConfig` / `OriginProtocol` - Where cache misses are fetched from
//! - `EdgeError` - The error taxonomy surfaced to the operator
//! - `RequestContext` - Per-request identity and timing
//! - `DispatchPhase` - Request state machine tracking
//! - `Clock` - Wall-clock seconds, swappable in tests

mod clock;
mod config;
mod context;
mod error;
mod lifecycle;

pub use clock::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use lifecycle::*;
