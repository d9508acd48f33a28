//! Per-URL cache metadata.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};
use crate::headers::HeaderBag;
use crate::key::{AssetLocation, CacheKey};
use crate::policy::CacheDirectives;

/// Metadata for one cached asset.
///
/// A record and its body file are a pair: the body is renamed into place
/// before the record is written, and the record is deleted before the
/// body. The persisted field names are stable across releases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Content address; always the MD5 of `url`.
    pub reference: CacheKey,
    /// Absolute origin URL.
    pub url: String,
    /// Body location, relative to the cache root.
    #[serde(rename = "localfile")]
    pub local_file: PathBuf,
    /// Unix seconds when the body was fetched or last revalidated.
    #[serde(rename = "timestamp")]
    pub fetched_at: i64,
    /// Freshness lifetime in seconds.
    #[serde(rename = "maxage")]
    pub max_age_secs: i64,
    /// Whether a stale copy must be confirmed with the origin.
    #[serde(rename = "revalidate")]
    pub must_revalidate: bool,
    /// Origin entity tag, empty if none.
    #[serde(default)]
    pub etag: String,
    /// Origin response headers, replayed on hits.
    #[serde(rename = "header", default)]
    pub response_headers: HeaderBag,
}

impl CacheRecord {
    /// Record for a freshly fetched origin response.
    pub fn new(
        location: &AssetLocation,
        fetched_at: i64,
        directives: &CacheDirectives,
        response_headers: HeaderBag,
    ) -> Self {
        Self {
            reference: location.key.clone(),
            url: location.url.clone(),
            local_file: location.relative_path.clone(),
            fetched_at,
            max_age_secs: directives.max_age_secs,
            must_revalidate: directives.revalidate,
            etag: response_headers.etag().to_string(),
            response_headers,
        }
    }

    /// Unix second after which the record is stale.
    pub fn expires_at(&self) -> i64 {
        self.fetched_at.saturating_add(self.max_age_secs)
    }

    /// Fresh while `now <= fetched_at + max_age`.
    pub fn is_fresh_at(&self, now: i64) -> bool {
        now <= self.expires_at()
    }

    /// Seconds since fetch or last revalidation.
    pub fn age_at(&self, now: i64) -> i64 {
        (now - self.fetched_at).max(0)
    }

    /// Absolute body path under `cache_root`.
    ///
    /// `None` when the stored path is absolute or climbs out of the root;
    /// such a record is treated as corrupt.
    pub fn body_path(&self, cache_root: &Path) -> Option<PathBuf> {
        let mut components = self.local_file.components().peekable();
        components.peek()?;
        if components.all(|c| matches!(c, Component::Normal(_))) {
            Some(cache_root.join(&self.local_file))
        } else {
            None
        }
    }

    /// Restart the freshness window after the origin confirmed the copy.
    pub fn refreshed(mut self, now: i64, etag: impl Into<String>) -> Self {
        self.fetched_at = now;
        self.etag = etag.into();
        self
    }

    /// Encode for storage.
    pub fn to_json_bytes(&self) -> CacheResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a stored record.
    ///
    /// A record whose `reference` is not the key of its `url` is corrupt.
    pub fn from_json_bytes(bytes: &[u8]) -> CacheResult<Self> {
        let record: Self = serde_json::from_slice(bytes)?;
        if record.reference != CacheKey::for_url(&record.url) {
            return Err(CacheError::Serialization(format!(
                "reference {} does not match url {}",
                record.reference, record.url
            )));
        }
        Ok(record)
    }
}
