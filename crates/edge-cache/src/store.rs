//! Metadata store abstraction.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::record::CacheRecord;

/// One entry seen during a scan.
///
/// `record` is an error when the stored value cannot be decoded, so the
/// caller can purge corrupt entries instead of aborting the scan.
#[derive(Debug)]
pub struct StoredEntry {
    /// Stored key.
    pub key: CacheKey,
    /// Decoded record, or why it could not be decoded.
    pub record: CacheResult<CacheRecord>,
}

/// Durable mapping from [`CacheKey`] to [`CacheRecord`].
///
/// Implementations must make each call atomic on its own; callers never
/// rely on multi-key transactions.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Fetch a record. A missing key is `Ok(None)`; an undecodable value is
    /// a `Serialization` error.
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheRecord>>;

    /// Insert or replace a record.
    async fn put(&self, key: &CacheKey, record: &CacheRecord) -> CacheResult<()>;

    /// Remove a record. Deleting a missing key succeeds.
    async fn delete(&self, key: &CacheKey) -> CacheResult<()>;

    /// Snapshot of every stored entry.
    async fn scan(&self) -> CacheResult<Vec<StoredEntry>>;

    /// Number of stored entries.
    async fn len(&self) -> CacheResult<usize> {
        Ok(self.scan().await?.len())
    }
}

/// In-memory metadata store (for tests and ephemeral runs).
///
/// Holds encoded records, so decoding behaves exactly like a durable store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<CacheKey, Vec<u8>>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under a key, bypassing encoding.
    pub async fn put_raw(&self, key: &CacheKey, bytes: impl Into<Vec<u8>>) {
        self.entries.write().await.insert(key.clone(), bytes.into());
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheRecord>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .map(|bytes| CacheRecord::from_json_bytes(bytes))
            .transpose()
    }

    async fn put(&self, key: &CacheKey, record: &CacheRecord) -> CacheResult<()> {
        let bytes = record.to_json_bytes()?;
        self.entries.write().await.insert(key.clone(), bytes);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn scan(&self) -> CacheResult<Vec<StoredEntry>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .map(|(key, bytes)| StoredEntry {
                key: key.clone(),
                record: CacheRecord::from_json_bytes(bytes),
            })
            .collect())
    }

    async fn len(&self) -> CacheResult<usize> {
        Ok(self.entries.read().await.len())
    }
}
