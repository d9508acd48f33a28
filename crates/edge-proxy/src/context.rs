//! Shared handles for request handling and sweeping.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use edge_cache::{AdmissionPolicy, AssetLocation, LocationError, MetadataStore};
use edge_core::{Clock, OriginConfig, SystemClock};
use edge_data::OriginClient;
use edge_executor::KeyedLocks;
use edge_observability::CacheMetrics;
use serde::{Deserialize, Serialize};

/// Largest body captured for caching by default (256 MiB).
pub const DEFAULT_MAX_OBJECT_BYTES: u64 = 256 * 1024 * 1024;

/// How long a miss waits for another request's fetch of the same key.
pub const DEFAULT_LOCK_WAIT_MS: u64 = 5_000;

/// Tunable cache behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Which content types may be stored.
    pub admission: AdmissionPolicy,
    /// Bodies larger than this are proxied but not stored.
    pub max_object_bytes: u64,
    /// Serialize concurrent misses for one key.
    pub coalesce_misses: bool,
    /// Longest wait for a coalesced key before redirecting instead.
    pub lock_wait_ms: u64,
    /// Serve the stored copy when an ETag check cannot reach the origin.
    pub serve_stale_on_revalidation_error: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            admission: AdmissionPolicy::default(),
            max_object_bytes: DEFAULT_MAX_OBJECT_BYTES,
            coalesce_misses: true,
            lock_wait_ms: DEFAULT_LOCK_WAIT_MS,
            serve_stale_on_revalidation_error: false,
        }
    }
}

impl CacheSettings {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

/// Everything a request or a sweep needs, built once at startup.
///
/// Cloning is cheap; every handle is shared.
#[derive(Clone)]
pub struct EdgeContext {
    origin: Arc<OriginConfig>,
    cache_root: Arc<PathBuf>,
    store: Arc<dyn MetadataStore>,
    client: Arc<dyn OriginClient>,
    clock: Arc<dyn Clock>,
    metrics: Arc<CacheMetrics>,
    locks: Arc<KeyedLocks>,
    settings: CacheSettings,
}

impl EdgeContext {
    /// Create a context with default settings and the system clock.
    pub fn new(
        origin: OriginConfig,
        cache_root: impl Into<PathBuf>,
        store: Arc<dyn MetadataStore>,
        client: Arc<dyn OriginClient>,
    ) -> Self {
        let settings = CacheSettings::default();
        Self {
            origin: Arc::new(origin),
            cache_root: Arc::new(cache_root.into()),
            store,
            client,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(CacheMetrics::new()),
            locks: Arc::new(locks_for(&settings)),
            settings,
        }
    }

    /// Replace the cache settings.
    pub fn with_settings(mut self, settings: CacheSettings) -> Self {
        self.locks = Arc::new(locks_for(&settings));
        self.settings = settings;
        self
    }

    /// Use a different time source.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Share an existing counter set.
    pub fn with_metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn origin(&self) -> &OriginConfig {
        &self.origin
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    pub fn store(&self) -> &dyn MetadataStore {
        self.store.as_ref()
    }

    pub fn client(&self) -> &dyn OriginClient {
        self.client.as_ref()
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    pub fn locks(&self) -> &KeyedLocks {
        &self.locks
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    /// Current Unix time in seconds.
    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    /// Map a request path onto the origin and the cache tree.
    pub fn locate(&self, request_path: &str) -> Result<AssetLocation, LocationError> {
        AssetLocation::resolve(&self.origin, request_path)
    }

    /// Absolute path of a location's body.
    pub fn body_path(&self, location: &AssetLocation) -> PathBuf {
        location.local_path(&self.cache_root)
    }
}

fn locks_for(settings: &CacheSettings) -> KeyedLocks {
    if settings.coalesce_misses {
        KeyedLocks::new()
    } else {
        KeyedLocks::disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{origin_config, FakeOrigin};
    use edge_cache::MemoryStore;
    use edge_core::ManualClock;

    #[test]
    fn test_settings_control_locking() {
        let ctx = EdgeContext::new(
            origin_config(),
            "/tmp/cache",
            Arc::new(MemoryStore::new()),
            Arc::new(FakeOrigin::new()),
        );
        assert!(ctx.locks().is_enabled());

        let ctx = ctx.with_settings(CacheSettings {
            coalesce_misses: false,
            ..CacheSettings::default()
        });
        assert!(!ctx.locks().is_enabled());
    }

    #[test]
    fn test_locate_and_body_path() {
        let ctx = EdgeContext::new(
            origin_config(),
            "/srv/cache",
            Arc::new(MemoryStore::new()),
            Arc::new(FakeOrigin::new()),
        )
        .with_clock(Arc::new(ManualClock::new(42)));

        let loc = ctx.locate("/img/a.png").unwrap();
        assert_eq!(loc.url, "http://origin.test/img/a.png");
        assert_eq!(ctx.body_path(&loc), PathBuf::from("/srv/cache/img/a.png"));
        assert_eq!(ctx.now(), 42);
        assert!(ctx.locate("/img/").is_err());
    }

    #[test]
    fn test_settings_deserialize_with_defaults() {
        let settings: CacheSettings =
            serde_json::from_str(r#"{"coalesce_misses": false}"#).unwrap();
        assert!(!settings.coalesce_misses);
        assert_eq!(settings.max_object_bytes, DEFAULT_MAX_OBJECT_BYTES);
        assert_eq!(settings.lock_wait(), Duration::from_secs(5));
    }
}
