//! Content addressing and local cache paths.

use std::path::{Component, Path, PathBuf};

use edge_core::OriginConfig;
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

/// Content address of a cached asset: lowercase hex MD5 of its origin URL.
///
/// Used only as a stable lookup key, never for integrity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for an absolute origin URL.
    pub fn for_url(url: &str) -> Self {
        let digest = Md5::digest(url.as_bytes());
        Self(hex::encode(digest))
    }

    /// Wrap an already-computed key, e.g. one read back from the store.
    pub fn from_raw(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key bytes as stored.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a request path cannot be mapped into the cache tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("path does not name a file: {0}")]
    NotAFile(String),

    #[error("path escapes the cache root: {0}")]
    Traversal(String),

    #[error("path contains an invalid segment: {0}")]
    InvalidSegment(String),

    #[error("path is not in canonical form: {0}")]
    NonCanonical(String),
}

/// Where an origin asset lives: its URL, key and place on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLocation {
    /// Absolute origin URL, `protocol://origin` + path.
    pub url: String,
    /// Content address of `url`.
    pub key: CacheKey,
    /// Path of the cached body relative to the cache root.
    pub relative_path: PathBuf,
}

impl AssetLocation {
    /// Map a request path (no query string) onto the origin and cache tree.
    pub fn resolve(origin: &OriginConfig, request_path: &str) -> Result<Self, LocationError> {
        let relative_path = relative_cache_path(request_path)?;
        let url = origin.url_for(request_path);
        let key = CacheKey::for_url(&url);
        Ok(Self {
            url,
            key,
            relative_path,
        })
    }

    /// Absolute path of the cached body under `cache_root`.
    pub fn local_path(&self, cache_root: &Path) -> PathBuf {
        cache_root.join(&self.relative_path)
    }
}

/// Sanitize a request path into a relative path under the cache root.
///
/// The path is used as-is, without percent-decoding. It must be canonical
/// (one leading `/`, no empty or `.` segments) so that distinct URLs never
/// share a body file; `..`, NUL and backslashes are rejected. Paths with
/// no final file name (empty, or ending in `/`) are rejected.
pub fn relative_cache_path(request_path: &str) -> Result<PathBuf, LocationError> {
    if request_path.is_empty() || request_path.ends_with('/') {
        return Err(LocationError::NotAFile(request_path.to_string()));
    }
    let Some(rest) = request_path.strip_prefix('/') else {
        return Err(LocationError::NonCanonical(request_path.to_string()));
    };

    let mut relative = PathBuf::new();
    for segment in rest.split('/') {
        match segment {
            "" | "." => return Err(LocationError::NonCanonical(request_path.to_string())),
            ".." => return Err(LocationError::Traversal(request_path.to_string())),
            s if s.contains('\0') || s.contains('\\') => {
                return Err(LocationError::InvalidSegment(request_path.to_string()))
            }
            s => relative.push(s),
        }
    }

    // Only plain components may survive; anything else would leave the root.
    if relative.as_os_str().is_empty()
        || !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
    {
        return Err(LocationError::NotAFile(request_path.to_string()));
    }

    Ok(relative)
}

/// Inverse of [`relative_cache_path`]: the request path a cached body
/// belongs to. `None` for paths that could not have come from a request.
pub fn request_path_for(relative: &Path) -> Option<String> {
    let mut request_path = String::new();
    for component in relative.components() {
        let Component::Normal(segment) = component else {
            return None;
        };
        request_path.push('/');
        request_path.push_str(segment.to_str()?);
    }
    relative_cache_path(&request_path).ok()?;
    Some(request_path)
}
