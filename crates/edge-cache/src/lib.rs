//! Caching infrastructure for the edge caching proxy.
//!
//! This crate provides:
//! - `CacheDirectives` / `AdmissionPolicy` - Origin header analysis
//! - `CacheKey` / `AssetLocation` - Content addressing and local paths
//! - `HeaderBag` - Captured origin headers, replayed on hits
//! - `CacheRecord` - Per-URL metadata and the freshness predicate
//! - `MetadataStore` - Durable record storage (`RocksDbStore`, `MemoryStore`)
//!
//! # Example
//!
//! ```ignore
//! use edge_cache::{AdmissionPolicy, AssetLocation, CacheDirectives};
//!
//! let location = AssetLocation::resolve(&origin, "/css/site.css")?;
//! let directives = CacheDirectives::parse("public, max-age=600");
//! let admitted = AdmissionPolicy::default().is_admissible("text/css; charset=utf-8");
//! ```

mod error;
mod headers;
mod key;
mod policy;
mod record;
mod rocks;
mod store;

pub use error::*;
pub use headers::*;
pub use key::*;
pub use policy::*;
pub use record::*;
pub use rocks::*;
pub use store::*;
