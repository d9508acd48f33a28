//! Captured origin headers and cache debugging headers.

use std::fmt;

use http::header::{HeaderName, HeaderValue, ETAG};
use http::HeaderMap;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::key::CacheKey;

/// Header names for cache debugging.
pub mod header_names {
    /// Cache status header (HIT, REVALIDATED, MISS, BYPASS).
    pub const X_CACHE_STATUS: &str = "X-Cache-Status";
    /// Cache key used for lookup.
    pub const X_CACHE_KEY: &str = "X-Cache-Key";
    /// Cache age in seconds.
    pub const X_CACHE_AGE: &str = "X-Cache-Age";
    /// Request header enabling the explain headers.
    pub const X_DEBUG_CACHE: &str = "X-Debug-Cache";
    /// Request ID for tracing.
    pub const X_REQUEST_ID: &str = "X-Request-ID";
}

/// Connection-level headers that are never stored, replayed or forwarded.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a header is hop-by-hop.
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Copy of `headers` without hop-by-hop entries.
pub fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Origin response headers, as persisted in a cache record.
///
/// Names keep the order the origin sent them in, and multi-valued headers
/// keep every value in order. Stored as a JSON object of name to values.
/// Names from `http` are lowercase; lookups are case-insensitive so records
/// written with canonical casing still resolve.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderBag(Vec<(String, Vec<String>)>);

impl HeaderBag {
    /// Create an empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture every header of an origin response.
    ///
    /// Values that are not valid UTF-8 are stored lossily.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut bag = Self::new();
        for (name, value) in headers {
            bag.append(
                name.as_str(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        bag
    }

    /// Add a value for `name`, after any values it already has.
    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values_mut(name.into()).push(value.into());
    }

    fn values_mut(&mut self, name: String) -> &mut Vec<String> {
        let index = match self.0.iter().position(|(k, _)| k.eq_ignore_ascii_case(&name)) {
            Some(index) => index,
            None => {
                self.0.push((name, Vec::new()));
                self.0.len() - 1
            }
        };
        &mut self.0[index].1
    }

    /// All values for `name`.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
            .unwrap_or_default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    /// Origin entity tag, or empty when none was sent.
    pub fn etag(&self) -> &str {
        self.get(ETAG.as_str()).unwrap_or_default()
    }

    /// Number of distinct header names.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(name, values)`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Headers to replay on a cache hit, in the order they were captured.
    ///
    /// Hop-by-hop headers and entries that are no longer valid header
    /// names or values are skipped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, values) in self.iter() {
            if is_hop_by_hop(name) {
                continue;
            }
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for value in values {
                if let Ok(v) = HeaderValue::from_str(value) {
                    map.append(header_name.clone(), v);
                }
            }
        }
        map
    }
}

impl Serialize for HeaderBag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, values) in &self.0 {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for HeaderBag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct BagVisitor;

        impl<'de> Visitor<'de> for BagVisitor {
            type Value = HeaderBag;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to lists of values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<HeaderBag, A::Error> {
                let mut bag = HeaderBag::new();
                while let Some((name, values)) = access.next_entry::<String, Vec<String>>()? {
                    bag.values_mut(name).extend(values);
                }
                Ok(bag)
            }
        }

        deserializer.deserialize_map(BagVisitor)
    }
}

/// How a request was answered, reported in `X-Cache-Status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Fresh local copy served.
    Hit,
    /// Stale copy confirmed by origin and served.
    Revalidated,
    /// Fetched from origin.
    Miss,
    /// Proxied without caching.
    Bypass,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Revalidated => write!(f, "REVALIDATED"),
            Self::Miss => write!(f, "MISS"),
            Self::Bypass => write!(f, "BYPASS"),
        }
    }
}

/// Cache explain headers for debugging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheExplainHeaders {
    /// Overall cache status.
    pub status: Option<CacheStatus>,
    /// Cache key used.
    pub cache_key: Option<String>,
    /// Age of cached response in seconds.
    pub age_secs: Option<i64>,
}

impl CacheExplainHeaders {
    /// Create new explain headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cache status.
    pub fn with_status(mut self, status: CacheStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set cache key.
    pub fn with_key(mut self, key: &CacheKey) -> Self {
        self.cache_key = Some(key.as_str().to_string());
        self
    }

    /// Set age.
    pub fn with_age(mut self, age_secs: i64) -> Self {
        self.age_secs = Some(age_secs.max(0));
        self
    }

    /// Convert to HTTP headers.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some(status) = &self.status {
            headers.push((header_names::X_CACHE_STATUS, status.to_string()));
        }

        if let Some(key) = &self.cache_key {
            headers.push((header_names::X_CACHE_KEY, key.clone()));
        }

        if let Some(age) = self.age_secs {
            headers.push((header_names::X_CACHE_AGE, age.to_string()));
        }

        headers
    }

    /// Append the explain headers to a response header map.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for (name, value) in self.to_headers() {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                headers.insert(name, value);
            }
        }
    }
}

/// Utility to check if debug headers should be included.
pub fn should_include_debug_headers(request_headers: &HeaderMap) -> bool {
    request_headers
        .get(header_names::X_DEBUG_CACHE)
        .map(|v| v.as_bytes() == b"1")
        .unwrap_or(false)
}
