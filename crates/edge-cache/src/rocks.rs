//! RocksDB-backed metadata store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, DB};

use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::record::CacheRecord;
use crate::store::{MetadataStore, StoredEntry};

/// Column family holding cache records.
pub const CACHE_COLUMN_FAMILY: &str = "Cache";

/// Durable metadata store on a local RocksDB database.
///
/// RocksDB calls block, so each one runs on the blocking pool.
#[derive(Clone)]
pub struct RocksDbStore {
    db: Arc<DB>,
}

impl RocksDbStore {
    /// Open or create the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> CacheResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf = ColumnFamilyDescriptor::new(CACHE_COLUMN_FAMILY, Options::default());
        let db = DB::open_cf_descriptors(&opts, path.as_ref(), vec![cf])?;
        tracing::debug!(path = %path.as_ref().display(), "opened metadata store");

        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, op: F) -> CacheResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&DB) -> CacheResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| CacheError::Storage(format!("store task failed: {e}")))?
    }
}

fn cache_cf(db: &DB) -> CacheResult<&rocksdb::ColumnFamily> {
    db.cf_handle(CACHE_COLUMN_FAMILY)
        .ok_or_else(|| CacheError::Storage(format!("missing column family {CACHE_COLUMN_FAMILY}")))
}

#[async_trait]
impl MetadataStore for RocksDbStore {
    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheRecord>> {
        let key = key.clone();
        self.blocking(move |db| {
            let cf = cache_cf(db)?;
            match db.get_cf(cf, key.as_bytes())? {
                Some(bytes) => CacheRecord::from_json_bytes(&bytes).map(Some),
                None => Ok(None),
            }
        })
        .await
    }

    async fn put(&self, key: &CacheKey, record: &CacheRecord) -> CacheResult<()> {
        let key = key.clone();
        let bytes = record.to_json_bytes()?;
        self.blocking(move |db| {
            let cf = cache_cf(db)?;
            db.put_cf(cf, key.as_bytes(), bytes)?;
            Ok(())
        })
        .await
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<()> {
        let key = key.clone();
        self.blocking(move |db| {
            let cf = cache_cf(db)?;
            db.delete_cf(cf, key.as_bytes())?;
            Ok(())
        })
        .await
    }

    async fn scan(&self) -> CacheResult<Vec<StoredEntry>> {
        self.blocking(|db| {
            let cf = cache_cf(db)?;
            let mut entries = Vec::new();
            for item in db.iterator_cf(cf, IteratorMode::Start) {
                let (key, value) = item?;
                entries.push(StoredEntry {
                    key: CacheKey::from_raw(String::from_utf8_lossy(&key).into_owned()),
                    record: CacheRecord::from_json_bytes(&value),
                });
            }
            Ok(entries)
        })
        .await
    }
}
