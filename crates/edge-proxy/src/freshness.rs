//! Freshness decisions for stored assets.

use std::fmt;

use edge_cache::{AssetLocation, CacheError, CacheRecord};
use edge_data::OriginHead;
use http::header::ETAG;
use http::StatusCode;
use tracing::{debug, warn};

use crate::context::EdgeContext;

/// How a stored copy qualified to be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshVia {
    /// Inside its freshness window.
    Window,
    /// Expired, but the origin confirmed the ETag; window restarted.
    Revalidated,
    /// Expired, the ETag check failed, and stale serving is enabled.
    StaleOnError,
}

/// Why a stored copy must not be served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    /// No record.
    Absent,
    /// Record could not be decoded or read.
    Unreadable,
    /// Past its window and not revalidatable.
    Expired,
    /// Origin reports a different (or no) entity tag, or no longer serves it.
    Changed,
    /// The ETag check could not reach the origin.
    RevalidationFailed,
}

impl fmt::Display for StaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Unreadable => write!(f, "unreadable"),
            Self::Expired => write!(f, "expired"),
            Self::Changed => write!(f, "changed"),
            Self::RevalidationFailed => write!(f, "revalidation_failed"),
        }
    }
}

/// Result of [`FreshnessValidator::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Freshness {
    Fresh { record: CacheRecord, via: FreshVia },
    Stale(StaleReason),
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh { .. })
    }
}

/// Decides whether a stored asset may be served as-is.
///
/// Never removes anything: on `Stale` the caller invalidates.
#[derive(Clone)]
pub struct FreshnessValidator {
    ctx: EdgeContext,
}

impl FreshnessValidator {
    pub fn new(ctx: EdgeContext) -> Self {
        Self { ctx }
    }

    /// Evaluate the stored record for `location`.
    ///
    /// 1. Absent or unreadable record: `Stale`.
    /// 2. `now <= fetched_at + max_age`: `Fresh`.
    /// 3. Expired without `must_revalidate`: `Stale`.
    /// 4. Otherwise HEAD the origin; a matching non-empty ETag refreshes
    ///    the record and yields `Fresh`, anything else `Stale`.
    pub async fn evaluate(&self, location: &AssetLocation) -> Freshness {
        let record = match self.ctx.store().get(&location.key).await {
            Ok(Some(record)) => record,
            Ok(None) => return Freshness::Stale(StaleReason::Absent),
            Err(CacheError::Serialization(e)) => {
                warn!(key = %location.key, error = %e, "unreadable cache record, treating as absent");
                return Freshness::Stale(StaleReason::Unreadable);
            }
            Err(e) => {
                warn!(key = %location.key, error = %e, "metadata lookup failed, treating as absent");
                return Freshness::Stale(StaleReason::Unreadable);
            }
        };

        let now = self.ctx.now();
        if record.is_fresh_at(now) {
            return Freshness::Fresh {
                record,
                via: FreshVia::Window,
            };
        }

        if !record.must_revalidate {
            debug!(url = %record.url, expired_at = record.expires_at(), "record expired");
            return Freshness::Stale(StaleReason::Expired);
        }

        self.revalidate(record, now).await
    }

    async fn revalidate(&self, record: CacheRecord, now: i64) -> Freshness {
        let head = match self.ctx.client().head(&record.url).await {
            Ok(head) => head,
            Err(e) if self.ctx.settings().serve_stale_on_revalidation_error => {
                warn!(url = %record.url, error = %e, "revalidation failed, serving stale copy");
                return Freshness::Fresh {
                    record,
                    via: FreshVia::StaleOnError,
                };
            }
            Err(e) => {
                warn!(url = %record.url, error = %e, "revalidation failed");
                return Freshness::Stale(StaleReason::RevalidationFailed);
            }
        };

        if !etag_matches(&record, &head) {
            debug!(url = %record.url, stored = %record.etag, "origin entity changed");
            return Freshness::Stale(StaleReason::Changed);
        }

        let etag = record.etag.clone();
        let refreshed = record.refreshed(now, etag);
        if let Err(e) = self.ctx.store().put(&refreshed.reference, &refreshed).await {
            // The body is still valid; only the window fails to restart.
            warn!(url = %refreshed.url, error = %e, "failed to store revalidated record");
        }
        debug!(url = %refreshed.url, "revalidated against origin");

        Freshness::Fresh {
            record: refreshed,
            via: FreshVia::Revalidated,
        }
    }
}

/// An empty stored ETag never validates; neither does a non-OK HEAD.
fn etag_matches(record: &CacheRecord, head: &OriginHead) -> bool {
    if head.status != StatusCode::OK || record.etag.is_empty() {
        return false;
    }
    head.header(ETAG.as_str()) == Some(record.etag.as_str())
}
