//! Request handling for the edge caching proxy.
//!
//! This crate provides:
//! - `EdgeContext` - Shared handles built once at startup
//! - `FreshnessValidator` - Fresh / stale decisions, with ETag revalidation
//! - `FetchPipeline` - Streams origin bodies to the client while populating the cache
//! - `Dispatcher` - Per-request state machine, the HTTP layer's single entry point
//! - `Sweeper` - Periodic removal of expired entries
//! - `router` / `serve` - The catch-all axum surface
//!
//! # Example
//!
//! ```ignore
//! use edge_proxy::{Dispatcher, EdgeContext};
//!
//! let ctx = EdgeContext::new(origin, cache_root, store, client);
//! let dispatcher = Arc::new(Dispatcher::new(ctx));
//! edge_proxy::serve(listener, dispatcher, shutdown).await?;
//! ```

mod context;
mod dispatcher;
mod error;
mod fallback;
mod freshness;
mod populate;
mod server;
mod sweeper;

#[cfg(test)]
mod testing;

pub use context::*;
pub use dispatcher::*;
pub use error::*;
pub use fallback::*;
pub use freshness::*;
pub use populate::*;
pub use server::*;
pub use sweeper::*;
