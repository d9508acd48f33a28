//! Origin cache policy analysis.
//!
//! Two independent decisions are made from origin response headers:
//! whether the content type is worth storing at all ([`AdmissionPolicy`]),
//! and what the origin's `Cache-Control` allows ([`CacheDirectives`]).

use http::header::{CACHE_CONTROL, CONTENT_TYPE};
use http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Freshness lifetime applied when the origin does not send `max-age`.
pub const DEFAULT_MAX_AGE_SECS: i64 = 3600;

/// Static asset media types admitted into the cache.
pub const CACHEABLE_CONTENT_TYPES: &[&str] = &[
    "text/css",
    "text/javascript",
    "application/javascript",
    "image/vnd.microsoft.icon",
    "image/x-icon",
    "image/gif",
    "image/png",
    "image/jpeg",
    "image/bmp",
    "image/webp",
    "audio/midi",
    "audio/mpeg",
    "audio/webm",
    "audio/ogg",
    "audio/wav",
    "video/webm",
    "video/ogg",
];

/// Markup media types, admitted only when explicitly enabled.
pub const MARKUP_CONTENT_TYPES: &[&str] = &["text/html", "image/svg+xml"];

/// Extract the bare media type from a `Content-Type` value.
///
/// Parameters after `;` are dropped and the result is lowercased, so
/// `"Text/CSS; charset=utf-8"` becomes `"text/css"`.
pub fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Decides which origin content types may be stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionPolicy {
    /// Also admit HTML and SVG.
    pub allow_markup: bool,
}

impl AdmissionPolicy {
    /// Static assets only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Also admit markup types.
    pub fn with_markup(mut self, allow: bool) -> Self {
        self.allow_markup = allow;
        self
    }

    /// Whether a `Content-Type` value is admissible.
    ///
    /// An empty or missing type is never admissible.
    pub fn is_admissible(&self, content_type: &str) -> bool {
        let media = media_type(content_type);
        if media.is_empty() {
            return false;
        }
        CACHEABLE_CONTENT_TYPES.contains(&media.as_str())
            || (self.allow_markup && MARKUP_CONTENT_TYPES.contains(&media.as_str()))
    }

    /// Whether an origin response's headers carry an admissible type.
    pub fn admits(&self, headers: &HeaderMap) -> bool {
        headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| self.is_admissible(ct))
            .unwrap_or(false)
    }
}

/// Caching directives derived from an origin `Cache-Control` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheDirectives {
    /// `private` or `no-store`: never persist.
    pub ignore: bool,
    /// `no-cache`, `must-revalidate` or `proxy-revalidate`.
    pub revalidate: bool,
    /// Freshness lifetime in seconds.
    pub max_age_secs: i64,
}

impl Default for CacheDirectives {
    fn default() -> Self {
        Self {
            ignore: false,
            revalidate: false,
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }
}

impl CacheDirectives {
    /// Parse a `Cache-Control` value.
    ///
    /// Directive names are matched exactly, case-insensitively, after
    /// trimming. `max-age` accepts both `max-age=N` and `max-age:N`; a
    /// malformed or negative value leaves the default in place. Unknown
    /// directives are ignored.
    pub fn parse(value: &str) -> Self {
        let mut directives = Self::default();

        for raw in value.split(',') {
            let raw = raw.trim();
            if raw.is_empty() {
                continue;
            }

            let (name, arg) = match raw.find(|c: char| c == '=' || c == ':') {
                Some(idx) => (&raw[..idx], Some(raw[idx + 1..].trim())),
                None => (raw, None),
            };

            match name.trim().to_ascii_lowercase().as_str() {
                "private" | "no-store" => directives.ignore = true,
                "no-cache" | "must-revalidate" | "proxy-revalidate" => {
                    directives.revalidate = true
                }
                "max-age" => {
                    let arg = arg.unwrap_or_default().trim_matches('"');
                    match arg.parse::<i64>() {
                        Ok(secs) if secs >= 0 => directives.max_age_secs = secs,
                        _ => tracing::debug!(
                            directive = raw,
                            "ignoring malformed max-age, keeping default"
                        ),
                    }
                }
                _ => {}
            }
        }

        directives
    }

    /// Directives from response headers.
    ///
    /// Multiple `Cache-Control` lines are combined. A response with no
    /// `Cache-Control` yields the defaults.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let combined: Vec<&str> = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        Self::parse(&combined.join(","))
    }

    /// Whether the response may be persisted.
    pub fn is_storable(&self) -> bool {
        !self.ignore
    }
}
