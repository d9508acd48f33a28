//! Per-request state machine.
//!
//! `Check -> {ServeCached, Validate, Fetch} -> Done`, with `Redirect` taken
//! whenever the fetch path cannot answer. Every request gets a response;
//! the worst case is a redirect to the origin.

use std::path::{Path, PathBuf};

use axum::body::Body;
use axum::response::Response;
use edge_cache::{
    header_names, should_include_debug_headers, AssetLocation, CacheExplainHeaders, CacheRecord,
    CacheStatus,
};
use edge_core::{DispatchPhase, RequestContext, TimingContext};
use edge_observability::{request_span, REQUEST_ID_HEADER};
use edge_streaming::{remove_body, FileBody};
use http::header::CONTENT_LENGTH;
use http::{HeaderValue, Method};
use tracing::{debug, info, warn, Instrument};

use crate::context::EdgeContext;
use crate::fallback::redirect_to_origin;
use crate::freshness::{FreshVia, Freshness, FreshnessValidator};
use crate::populate::FetchPipeline;

/// A response plus what to report about it.
struct Dispatched {
    response: Response,
    explain: Option<CacheExplainHeaders>,
    outcome: &'static str,
}

/// Single entry point from the HTTP layer.
#[derive(Clone)]
pub struct Dispatcher {
    ctx: EdgeContext,
    validator: FreshnessValidator,
    pipeline: FetchPipeline,
}

impl Dispatcher {
    pub fn new(ctx: EdgeContext) -> Self {
        Self {
            validator: FreshnessValidator::new(ctx.clone()),
            pipeline: FetchPipeline::new(ctx.clone()),
            ctx,
        }
    }

    pub fn context(&self) -> &EdgeContext {
        &self.ctx
    }

    /// Answer one request.
    pub async fn dispatch(&self, mut request: RequestContext) -> Response {
        let span = request_span(&request);
        async move {
            let Dispatched {
                mut response,
                explain,
                outcome,
            } = self.handle(&request.method, &request.path, &mut request.timing).await;

            if let Some(explain) = explain.filter(|_| should_include_debug_headers(&request.headers)) {
                explain.apply(response.headers_mut());
            }
            if let Ok(id) = HeaderValue::from_str(request.request_id.as_str()) {
                response.headers_mut().insert(REQUEST_ID_HEADER, id);
            }

            let last = request.timing.phase();
            request.timing.enter(DispatchPhase::Done);
            let span = tracing::Span::current();
            span.record("phase", last.name());
            span.record("outcome", outcome);
            info!(
                status = response.status().as_u16(),
                elapsed_ms = request.timing.elapsed().as_millis() as u64,
                "request finished"
            );
            response
        }
        .instrument(span)
        .await
    }

    async fn handle(&self, method: &Method, path: &str, timing: &mut TimingContext) -> Dispatched {
        if *method != Method::GET {
            debug!("method not cacheable");
            return self.redirect(&self.ctx.origin().url_for(path), timing);
        }

        let location = match self.ctx.locate(path) {
            Ok(location) => location,
            Err(e) => {
                debug!(error = %e, "path does not map into the cache");
                return self.redirect(&self.ctx.origin().url_for(path), timing);
            }
        };
        let body_path = self.ctx.body_path(&location);

        if is_file(&body_path).await {
            timing.enter(DispatchPhase::Validate);
            match self.validator.evaluate(&location).await {
                Freshness::Fresh { record, via } => {
                    if let Some(done) = self.serve_cached(&location, &record, &body_path, via, timing).await {
                        return done;
                    }
                }
                Freshness::Stale(reason) => debug!(%reason, "stored copy is stale"),
            }
        }

        self.refetch(location, body_path, timing).await
    }

    /// Stream a fresh local copy. `None` if the body cannot be opened.
    async fn serve_cached(
        &self,
        location: &AssetLocation,
        record: &CacheRecord,
        body_path: &Path,
        via: FreshVia,
        timing: &mut TimingContext,
    ) -> Option<Dispatched> {
        let file = match FileBody::open(body_path).await {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %body_path.display(), error = %e, "cached body unreadable, refetching");
                return None;
            }
        };
        timing.enter(DispatchPhase::ServeCached);

        let status = match via {
            FreshVia::Revalidated => {
                self.ctx.metrics().record_revalidated();
                CacheStatus::Revalidated
            }
            FreshVia::Window | FreshVia::StaleOnError => {
                self.ctx.metrics().record_hit();
                CacheStatus::Hit
            }
        };
        self.ctx.metrics().add_bytes_served_from_cache(file.len);

        let mut response = Response::new(Body::from_stream(file.stream));
        *response.headers_mut() = record.response_headers.to_header_map();
        response
            .headers_mut()
            .insert(CONTENT_LENGTH, HeaderValue::from(file.len));

        Some(Dispatched {
            response,
            explain: Some(
                CacheExplainHeaders::new()
                    .with_status(status)
                    .with_key(&location.key)
                    .with_age(record.age_at(self.ctx.now())),
            ),
            outcome: if status == CacheStatus::Hit { "hit" } else { "revalidated" },
        })
    }

    /// Invalidate whatever is stored and fetch from origin.
    ///
    /// With coalescing, concurrent callers queue on the key lock and the
    /// later ones re-check the cache once they get it. The holder keeps the
    /// lock until its client has read the whole body, so the wait is
    /// bounded and a caller that runs out of patience is redirected.
    async fn refetch(
        &self,
        location: AssetLocation,
        body_path: PathBuf,
        timing: &mut TimingContext,
    ) -> Dispatched {
        let wait = self.ctx.settings().lock_wait();
        let Some(guard) = self.ctx.locks().acquire_within(location.key.as_str(), wait).await else {
            warn!(
                url = %location.url,
                wait_ms = wait.as_millis() as u64,
                "fetch for this key still in progress, redirecting"
            );
            return self.redirect(&location.url, timing);
        };

        if self.ctx.locks().is_enabled() && is_file(&body_path).await {
            if let Freshness::Fresh { record, via } = self.validator.evaluate(&location).await {
                if let Some(done) = self.serve_cached(&location, &record, &body_path, via, timing).await {
                    return done;
                }
            }
        }

        timing.enter(DispatchPhase::Fetch);
        self.invalidate(&location, &body_path).await;

        match self.pipeline.fetch_and_serve(&location, guard).await {
            Ok((response, status)) => {
                if status == CacheStatus::Miss {
                    self.ctx.metrics().record_miss();
                }
                Dispatched {
                    response,
                    explain: Some(CacheExplainHeaders::new().with_status(status).with_key(&location.key)),
                    outcome: if status == CacheStatus::Miss { "miss" } else { "bypass" },
                }
            }
            Err(e) if e.is_pass_through() => {
                debug!(url = %location.url, reason = %e, "not cacheable, redirecting");
                self.redirect(&location.url, timing)
            }
            Err(e) => {
                warn!(url = %location.url, error = %e, "origin fetch failed, redirecting");
                self.redirect(&location.url, timing)
            }
        }
    }

    /// Delete the record, then the body.
    async fn invalidate(&self, location: &AssetLocation, body_path: &Path) {
        let had_record = match self.ctx.store().get(&location.key).await {
            Ok(record) => record.is_some(),
            Err(_) => true,
        };

        if let Err(e) = self.ctx.store().delete(&location.key).await {
            // Leave the body so the surviving record still has its file.
            warn!(key = %location.key, error = %e, "failed to delete cache record");
            return;
        }

        let had_body = match remove_body(body_path).await {
            Ok(removed) => removed,
            Err(e) => {
                warn!(path = %body_path.display(), error = %e, "failed to remove cached body");
                false
            }
        };

        if had_record || had_body {
            debug!(key = %location.key, "invalidated stored copy");
            self.ctx.metrics().record_invalidated();
        }
    }

    fn redirect(&self, url: &str, timing: &mut TimingContext) -> Dispatched {
        timing.enter(DispatchPhase::Redirect);
        self.ctx.metrics().record_redirect();
        Dispatched {
            response: redirect_to_origin(url),
            explain: None,
            outcome: "redirect",
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
