//! Observability infrastructure for the edge caching proxy.
//!
//! This crate provides:
//! - `init_logging` - Global `tracing` subscriber, human or JSON output
//! - `request_span` - Per-request span carrying the request ID
//! - `CacheMetrics` - Process-wide cache counters

mod logging;
mod metrics;
mod span;

pub use logging::*;
pub use metrics::*;
pub use span::*;

// Re-export RequestId from edge-core for convenience
pub use edge_core::RequestId;
