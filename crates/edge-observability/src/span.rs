//! Request spans.

use edge_core::{RequestContext, RequestId};
use http::HeaderMap;

/// Inbound header carrying a caller-supplied request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

/// Request ID for an inbound request.
///
/// Reuses a well-formed `X-Request-ID` so log lines correlate with the
/// caller; otherwise generates a fresh one.
pub fn request_id_from_headers(headers: &HeaderMap) -> RequestId {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| {
            !id.is_empty()
                && id.len() <= MAX_REQUEST_ID_LEN
                && id.bytes().all(|b| b.is_ascii_graphic())
        })
        .map(RequestId::from_string)
        .unwrap_or_else(RequestId::generate)
}

/// Span wrapping all work for one request.
///
/// `phase` and `outcome` start empty and are recorded by the dispatcher.
pub fn request_span(ctx: &RequestContext) -> tracing::Span {
    tracing::info_span!(
        "request",
        request_id = %ctx.request_id,
        method = %ctx.method,
        path = %ctx.path,
        phase = tracing::field::Empty,
        outcome = tracing::field::Empty,
    )
}
