//! Streaming primitives for the edge caching proxy.
//!
//! - `TeeStream` - Forwards an origin body while capturing it
//! - `CaptureLimit` - Upper bound on captured bytes
//! - `FileBody` - Streams a cached body from disk
//! - `persist_atomically` - Writes a body where readers never see it partial

mod file;
mod tee;

pub use file::*;
pub use tee::*;
