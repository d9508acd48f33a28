//! Coordination primitives for the edge caching proxy.
//!
//! - `KeyedLocks` - One in-flight fetch per cache key
//! - `PeriodicTask` - Interval loop stopped by a cancellation token

mod coalesce;
mod scheduler;

pub use coalesce::*;
pub use scheduler::*;
