//! HTTP surface: one catch-all route into the dispatcher.

use std::io;
use std::sync::Arc;

use axum::extract::State;
use axum::response::Response;
use axum::Router;
use edge_core::RequestContext;
use edge_observability::request_id_from_headers;
use http::{HeaderMap, Method, Uri};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::dispatcher::Dispatcher;

/// Router sending every path and method to `dispatcher`.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new().fallback(handle).with_state(dispatcher)
}

async fn handle(
    State(dispatcher): State<Arc<Dispatcher>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let request = RequestContext::new(method, uri.path())
        .with_request_id(request_id_from_headers(&headers))
        .with_headers(headers);
    dispatcher.dispatch(request).await
}

/// Serve on `listener` until `shutdown` is cancelled.
///
/// In-flight requests are allowed to finish.
pub async fn serve(
    listener: TcpListener,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, origin = %dispatcher.context().origin().base_url(), "edge proxy listening");
    }
    axum::serve(listener, router(dispatcher))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
