//! Fetch-and-populate: stream an origin body to the client while
//! capturing it for the cache.

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use edge_cache::{
    end_to_end_headers, AssetLocation, CacheDirectives, CacheError, CacheRecord, CacheStatus,
    HeaderBag,
};
use edge_executor::KeyGuard;
use edge_streaming::{persist_atomically, remove_body, CaptureLimit, CompletionHandler, TeeStream};
use futures::FutureExt;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use tracing::{debug, info, warn};

use crate::context::EdgeContext;
use crate::error::PipelineError;

/// Fetches assets from the origin and populates the cache on the way
/// through.
#[derive(Clone)]
pub struct FetchPipeline {
    ctx: EdgeContext,
}

impl FetchPipeline {
    pub fn new(ctx: EdgeContext) -> Self {
        Self { ctx }
    }

    /// Serve `location` from the origin.
    ///
    /// A HEAD request rejects non-OK and inadmissible assets before any body
    /// is requested; the caller redirects on every error. On success the
    /// returned response streams the origin body. When the response is
    /// storable its bytes are captured, and at end-of-stream the body file
    /// and then the record are written before the stream finishes.
    ///
    /// `guard` is held until population finishes or is abandoned.
    pub async fn fetch_and_serve(
        &self,
        location: &AssetLocation,
        guard: KeyGuard,
    ) -> Result<(Response, CacheStatus), PipelineError> {
        let client = self.ctx.client();
        let admission = self.ctx.settings().admission;

        let head = client.head(&location.url).await?;
        if head.status != StatusCode::OK {
            return Err(PipelineError::NotOk {
                status: head.status,
                url: location.url.clone(),
            });
        }
        if !admission.admits(&head.headers) {
            return Err(PipelineError::Inadmissible {
                content_type: content_type(&head.headers),
            });
        }

        let origin = client.get(&location.url).await?;
        if origin.status != StatusCode::OK {
            return Err(PipelineError::NotOk {
                status: origin.status,
                url: location.url.clone(),
            });
        }

        let directives = CacheDirectives::from_headers(&origin.headers);
        let forwarded = end_to_end_headers(&origin.headers);

        if !directives.is_storable() || !admission.admits(&origin.headers) {
            debug!(url = %location.url, "response not storable, proxying");
            self.ctx.metrics().record_bypass();
            drop(guard);
            return Ok((respond(forwarded, Body::from_stream(origin.body)), CacheStatus::Bypass));
        }

        let population = Population {
            ctx: self.ctx.clone(),
            location: location.clone(),
            directives,
            headers: HeaderBag::from_header_map(&origin.headers),
        };
        let limit = usize::try_from(self.ctx.settings().max_object_bytes).unwrap_or(usize::MAX);
        let body = TeeStream::new(origin.body, population.into_handler(guard))
            .with_limit(CaptureLimit::Bytes(limit));

        Ok((respond(forwarded, Body::from_stream(body)), CacheStatus::Miss))
    }
}

fn respond(headers: HeaderMap, body: Body) -> Response {
    let mut response = Response::new(body);
    *response.headers_mut() = headers;
    response
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// Everything needed to store one captured body.
struct Population {
    ctx: EdgeContext,
    location: AssetLocation,
    directives: CacheDirectives,
    headers: HeaderBag,
}

impl Population {
    /// Completion handler for the tee.
    ///
    /// The write runs on its own task so a client that disconnects during
    /// the tail does not cancel it; the stream still waits for the task.
    fn into_handler(self, guard: KeyGuard) -> CompletionHandler {
        Box::new(move |body: Bytes| {
            let url = self.location.url.clone();
            let task = tokio::spawn(async move {
                let _guard = guard;
                let bytes = body.len();
                match self.store(body).await {
                    Ok(()) => info!(url = %self.location.url, bytes, "cache populated"),
                    Err(e) => warn!(url = %self.location.url, error = %e, "cache population failed"),
                }
            });
            async move {
                if let Err(e) = task.await {
                    warn!(url = %url, error = %e, "population task failed");
                }
            }
            .boxed()
        })
    }

    async fn store(&self, body: Bytes) -> Result<(), PipelineError> {
        let path = self.ctx.body_path(&self.location);
        persist_atomically(&path, &body)
            .await
            .map_err(CacheError::from)?;

        let record = CacheRecord::new(
            &self.location,
            self.ctx.now(),
            &self.directives,
            self.headers.clone(),
        );
        if let Err(e) = self.ctx.store().put(&record.reference, &record).await {
            // A body without a record must not survive.
            if let Err(rm) = remove_body(&path).await {
                warn!(path = %path.display(), error = %rm, "failed to remove unregistered body");
            }
            return Err(e.into());
        }

        self.ctx.metrics().record_populated(body.len() as u64);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use async_trait::async_trait;
    use edge_cache::{CacheKey, CacheResult, MetadataStore, StoredEntry};
    use edge_core::ManualClock;

    use crate::context::CacheSettings;
    use crate::testing::{collect_body, harness, origin_config, FakeAsset, FakeOrigin, START};

    #[tokio::test]
    async fn test_streams_and_populates() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.origin.serve(
            "/css/site.css",
            FakeAsset::new("text/css", b"body { color: red }")
                .header("etag", "\"v1\"")
                .header("cache-control", "max-age=120"),
        );
        let pipeline = FetchPipeline::new(h.ctx.clone());
        let loc = h.ctx.locate("/css/site.css").unwrap();

        let guard = h.ctx.locks().acquire(loc.key.as_str()).await;
        let (response, status) = pipeline.fetch_and_serve(&loc, guard).await.unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/css");

        let body = collect_body(response.into_body()).await;
        assert_eq!(body, b"body { color: red }");

        let stored = std::fs::read(dir.path().join("css/site.css")).unwrap();
        assert_eq!(stored, body);
        let record = h.store.get(&loc.key).await.unwrap().unwrap();
        assert_eq!(record.fetched_at, START);
        assert_eq!(record.max_age_secs, 120);
        assert_eq!(record.etag, "\"v1\"");
        assert_eq!(record.response_headers.get("cache-control"), Some("max-age=120"));

        assert_eq!(h.ctx.locks().in_flight(), 0);
        assert_eq!(h.ctx.metrics().snapshot().populated, 1);
        assert_eq!(h.origin.heads(), 1);
        assert_eq!(h.origin.gets(), 1);
    }

    #[tokio::test]
    async fn test_private_is_proxied_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.origin.serve(
            "/me.js",
            FakeAsset::new("application/javascript", b"let me = 1;")
                .header("cache-control", "private, max-age=600"),
        );
        let pipeline = FetchPipeline::new(h.ctx.clone());
        let loc = h.ctx.locate("/me.js").unwrap();

        let guard = h.ctx.locks().acquire(loc.key.as_str()).await;
        let (response, status) = pipeline.fetch_and_serve(&loc, guard).await.unwrap();
        assert_eq!(status, CacheStatus::Bypass);
        assert_eq!(collect_body(response.into_body()).await, b"let me = 1;");

        assert!(!dir.path().join("me.js").exists());
        assert!(h.store.get(&loc.key).await.unwrap().is_none());
        assert_eq!(h.ctx.metrics().snapshot().bypassed, 1);
    }

    #[tokio::test]
    async fn test_inadmissible_skips_get() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.origin.serve("/index.html", FakeAsset::new("text/html", b"<html>"));
        let pipeline = FetchPipeline::new(h.ctx.clone());
        let loc = h.ctx.locate("/index.html").unwrap();

        let guard = h.ctx.locks().acquire(loc.key.as_str()).await;
        let err = pipeline.fetch_and_serve(&loc, guard).await.unwrap_err();
        assert!(matches!(err, PipelineError::Inadmissible { ref content_type } if content_type == "text/html"));
        assert_eq!(h.origin.gets(), 0);
    }

    #[tokio::test]
    async fn test_markup_admitted_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.origin.serve("/index.html", FakeAsset::new("text/html", b"<html>"));
        let ctx = h.ctx.clone().with_settings(CacheSettings {
            admission: edge_cache::AdmissionPolicy::new().with_markup(true),
            ..CacheSettings::default()
        });
        let pipeline = FetchPipeline::new(ctx.clone());
        let loc = ctx.locate("/index.html").unwrap();

        let guard = ctx.locks().acquire(loc.key.as_str()).await;
        let (response, _) = pipeline.fetch_and_serve(&loc, guard).await.unwrap();
        collect_body(response.into_body()).await;
        assert!(dir.path().join("index.html").exists());
    }

    #[tokio::test]
    async fn test_missing_asset_is_not_ok() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        let pipeline = FetchPipeline::new(h.ctx.clone());
        let loc = h.ctx.locate("/gone.css").unwrap();

        let guard = h.ctx.locks().acquire(loc.key.as_str()).await;
        let err = pipeline.fetch_and_serve(&loc, guard).await.unwrap_err();
        assert!(matches!(err, PipelineError::NotOk { status, .. } if status == StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn test_broken_body_is_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.origin.serve(
            "/a.png",
            FakeAsset::new("image/png", b"\x89PNG....").broken_body(),
        );
        let pipeline = FetchPipeline::new(h.ctx.clone());
        let loc = h.ctx.locate("/a.png").unwrap();

        let guard = h.ctx.locks().acquire(loc.key.as_str()).await;
        let (response, _) = pipeline.fetch_and_serve(&loc, guard).await.unwrap();
        collect_body(response.into_body()).await;

        assert!(!dir.path().join("a.png").exists());
        assert!(h.store.get(&loc.key).await.unwrap().is_none());
        assert_eq!(h.ctx.locks().in_flight(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_is_not_stored() {
        let dir = tempfile::tempdir().unwrap();
        let h = harness(dir.path());
        h.origin
            .serve("/big.js", FakeAsset::new("text/javascript", b"0123456789"));
        let ctx = h.ctx.clone().with_settings(CacheSettings {
            max_object_bytes: 8,
            ..CacheSettings::default()
        });
        let pipeline = FetchPipeline::new(ctx.clone());
        let loc = ctx.locate("/big.js").unwrap();

        let guard = ctx.locks().acquire(loc.key.as_str()).await;
        let (response, status) = pipeline.fetch_and_serve(&loc, guard).await.unwrap();
        assert_eq!(status, CacheStatus::Miss);
        assert_eq!(collect_body(response.into_body()).await, b"0123456789");
        assert!(!dir.path().join("big.js").exists());
        assert!(h.store.get(&loc.key).await.unwrap().is_none());
    }

    /// Store whose writes always fail.
    struct ReadOnlyStore;

    #[async_trait]
    impl MetadataStore for ReadOnlyStore {
        async fn get(&self, _key: &CacheKey) -> CacheResult<Option<CacheRecord>> {
            Ok(None)
        }

        async fn put(&self, _key: &CacheKey, _record: &CacheRecord) -> CacheResult<()> {
            Err(CacheError::Storage("read-only".into()))
        }

        async fn delete(&self, _key: &CacheKey) -> CacheResult<()> {
            Ok(())
        }

        async fn scan(&self) -> CacheResult<Vec<StoredEntry>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_failed_put_removes_body() {
        let dir = tempfile::tempdir().unwrap();
        let origin = Arc::new(FakeOrigin::new());
        origin.serve("/a.css", FakeAsset::new("text/css", b"a{}"));
        let ctx = EdgeContext::new(origin_config(), dir.path(), Arc::new(ReadOnlyStore), origin)
            .with_clock(Arc::new(ManualClock::new(START)));
        let pipeline = FetchPipeline::new(ctx.clone());
        let loc = ctx.locate("/a.css").unwrap();

        let guard = ctx.locks().acquire(loc.key.as_str()).await;
        let (response, _) = pipeline.fetch_and_serve(&loc, guard).await.unwrap();
        assert_eq!(collect_body(response.into_body()).await, b"a{}");
        assert!(!dir.path().join("a.css").exists());
        assert_eq!(ctx.metrics().snapshot().populated, 0);
    }
}
