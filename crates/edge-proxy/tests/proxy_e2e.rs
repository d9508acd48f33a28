//! End-to-end tests: a real origin on a loopback socket, the reqwest
//! client, and the router driven without a listener.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Router;
use edge_cache::{CacheKey, MemoryStore, MetadataStore, RocksDbStore};
use edge_core::{ManualClock, OriginConfig, OriginProtocol};
use edge_data::{ReqwestOrigin, TimeoutConfig};
use edge_proxy::{router, Dispatcher, EdgeContext, Sweeper};
use futures::StreamExt;
use http::{HeaderMap, Method, Request, StatusCode, Uri};
use tempfile::TempDir;
use tower::ServiceExt;

const START: i64 = 1_700_000_000;

#[derive(Default)]
struct Origin {
    heads: AtomicUsize,
    gets: AtomicUsize,
    version: Mutex<u32>,
}

impl Origin {
    fn heads(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        *self.version.lock().unwrap() += 1;
    }
}

async fn origin_handler(State(origin): State<Arc<Origin>>, method: Method, uri: Uri) -> Response {
    if method == Method::HEAD {
        origin.heads.fetch_add(1, Ordering::SeqCst);
    } else {
        origin.gets.fetch_add(1, Ordering::SeqCst);
    }
    let version = *origin.version.lock().unwrap();
    let etag = format!("\"v{version}\"");

    match uri.path() {
        "/static/site.css" => (
            [
                ("content-type", "text/css; charset=utf-8"),
                ("cache-control", "public, max-age=60"),
                ("etag", etag.as_str()),
            ],
            format!("body{{--v:{version}}}"),
        )
            .into_response(),
        "/static/app.js" => (
            [
                ("content-type", "application/javascript"),
                ("cache-control", "max-age=60, must-revalidate"),
                ("etag", etag.as_str()),
            ],
            format!("run({version})"),
        )
            .into_response(),
        "/static/logo.png" => ([("content-type", "image/png")], "PNG").into_response(),
        "/account.js" => (
            [
                ("content-type", "text/javascript"),
                ("cache-control", "private, max-age=600"),
            ],
            "user()",
        )
            .into_response(),
        "/index.html" => ([("content-type", "text/html")], "<html></html>").into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn spawn_origin() -> (SocketAddr, Arc<Origin>) {
    let origin = Arc::new(Origin::default());
    let app = Router::new()
        .fallback(origin_handler)
        .with_state(origin.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, origin)
}

struct Edge {
    app: Router,
    ctx: EdgeContext,
    clock: Arc<ManualClock>,
    cache: TempDir,
    base: String,
}

impl Edge {
    async fn get(&self, path: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        self.send(Method::GET, path).await
    }

    async fn send(&self, method: Method, path: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("x-debug-cache", "1")
            .body(Body::empty())
            .unwrap();
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let mut body = Vec::new();
        let mut stream = response.into_body().into_data_stream();
        while let Some(chunk) = stream.next().await {
            body.extend_from_slice(&chunk.unwrap());
        }
        (status, headers, body)
    }

    fn file(&self, relative: &str) -> std::path::PathBuf {
        self.cache.path().join(relative)
    }

    fn key(&self, path: &str) -> CacheKey {
        CacheKey::for_url(&format!("{}{path}", self.base))
    }
}

fn edge_for(host: String, store: Arc<dyn MetadataStore>) -> Edge {
    let cache = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(START));
    let origin = OriginConfig::new(OriginProtocol::Http, host).unwrap();
    let base = origin.base_url();
    let client = ReqwestOrigin::new(TimeoutConfig::from_millis(1_000, 2_000, 2_000)).unwrap();
    let ctx = EdgeContext::new(origin, cache.path(), store, Arc::new(client)).with_clock(clock.clone());
    let app = router(Arc::new(Dispatcher::new(ctx.clone())));
    Edge {
        app,
        ctx,
        clock,
        cache,
        base,
    }
}

async fn edge() -> (Edge, Arc<Origin>) {
    let (addr, origin) = spawn_origin().await;
    (edge_for(addr.to_string(), Arc::new(MemoryStore::new())), origin)
}

#[tokio::test]
async fn test_miss_populates_then_hit_skips_origin() {
    let (edge, origin) = edge().await;

    let (status, headers, body) = edge.get("/static/site.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"body{--v:0}");
    assert_eq!(headers["x-cache-status"], "MISS");
    assert_eq!(headers["content-type"], "text/css; charset=utf-8");

    assert_eq!(std::fs::read(edge.file("static/site.css")).unwrap(), b"body{--v:0}");
    let record = edge
        .ctx
        .store()
        .get(&edge.key("/static/site.css"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.max_age_secs, 60);
    assert_eq!(record.etag, "\"v0\"");

    let (heads, gets) = (origin.heads(), origin.gets());
    let (status, headers, body) = edge.get("/static/site.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"body{--v:0}");
    assert_eq!(headers["x-cache-status"], "HIT");
    assert_eq!(headers["etag"], "\"v0\"");
    assert_eq!((origin.heads(), origin.gets()), (heads, gets));
}

#[tokio::test]
async fn test_expired_entry_is_refetched() {
    let (edge, origin) = edge().await;
    edge.get("/static/site.css").await;

    origin.bump();
    edge.clock.set(START + 60);
    let (_, _, body) = edge.get("/static/site.css").await;
    assert_eq!(body, b"body{--v:0}");

    edge.clock.set(START + 61);
    let (_, headers, body) = edge.get("/static/site.css").await;
    assert_eq!(body, b"body{--v:1}");
    assert_eq!(headers["x-cache-status"], "MISS");
    assert_eq!(origin.gets(), 2);
    assert_eq!(std::fs::read(edge.file("static/site.css")).unwrap(), b"body{--v:1}");
}

#[tokio::test]
async fn test_must_revalidate_with_same_etag_restarts_window() {
    let (edge, origin) = edge().await;
    edge.get("/static/app.js").await;
    let heads = origin.heads();

    edge.clock.set(START + 61);
    let (status, headers, body) = edge.get("/static/app.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"run(0)");
    assert_eq!(headers["x-cache-status"], "REVALIDATED");
    assert_eq!(origin.heads(), heads + 1);
    assert_eq!(origin.gets(), 1);

    let record = edge
        .ctx
        .store()
        .get(&edge.key("/static/app.js"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.fetched_at, START + 61);
}

#[tokio::test]
async fn test_must_revalidate_with_new_etag_refetches() {
    let (edge, origin) = edge().await;
    edge.get("/static/app.js").await;

    origin.bump();
    edge.clock.set(START + 61);
    let (_, headers, body) = edge.get("/static/app.js").await;
    assert_eq!(body, b"run(1)");
    assert_eq!(headers["x-cache-status"], "MISS");
    assert_eq!(origin.gets(), 2);
}

#[tokio::test]
async fn test_private_response_is_never_persisted() {
    let (edge, _origin) = edge().await;

    let (status, headers, body) = edge.get("/account.js").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"user()");
    assert_eq!(headers["x-cache-status"], "BYPASS");
    assert!(!edge.file("account.js").exists());
    assert!(edge.ctx.store().get(&edge.key("/account.js")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_inadmissible_and_missing_assets_redirect() {
    let (edge, origin) = edge().await;

    let (status, headers, _) = edge.get("/index.html").await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers["location"], format!("{}/index.html", edge.base).as_str());

    let (status, _, _) = edge.get("/nope.css").await;
    assert_eq!(status, StatusCode::FOUND);

    assert_eq!(origin.gets(), 0);
    assert!(!edge.file("index.html").exists());
}

#[tokio::test]
async fn test_non_get_redirects_without_origin_contact() {
    let (edge, origin) = edge().await;

    let (status, headers, _) = edge.send(Method::POST, "/static/site.css").await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers["location"], format!("{}/static/site.css", edge.base).as_str());
    assert_eq!(origin.heads() + origin.gets(), 0);
}

#[tokio::test]
async fn test_unreachable_origin_redirects() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let edge = edge_for(addr.to_string(), Arc::new(MemoryStore::new()));

    let (status, headers, _) = edge.get("/static/site.css").await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers["location"], format!("http://{addr}/static/site.css").as_str());
    assert!(!edge.file("static/site.css").exists());
}

#[tokio::test]
async fn test_concurrent_misses_fetch_once() {
    let (edge, origin) = edge().await;

    let (a, b, c) = tokio::join!(
        edge.get("/static/logo.png"),
        edge.get("/static/logo.png"),
        edge.get("/static/logo.png"),
    );
    for (status, _, body) in [a, b, c] {
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"PNG");
    }
    assert_eq!(origin.gets(), 1);
}

#[tokio::test]
async fn test_sweeper_keeps_pairs_consistent_on_rocksdb() {
    let (addr, origin) = spawn_origin().await;
    let db_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RocksDbStore::open(db_dir.path().join("cache.db")).unwrap());
    let edge = edge_for(addr.to_string(), store.clone());

    // max-age 60 and the default 3600.
    edge.get("/static/site.css").await;
    edge.get("/static/logo.png").await;
    assert_eq!(origin.gets(), 2);
    assert_eq!(store.len().await.unwrap(), 2);

    edge.clock.set(START + 61);
    let report = Sweeper::new(edge.ctx.clone()).sweep().await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.expired, 1);
    assert_eq!(report.kept, 1);

    assert!(store.get(&edge.key("/static/site.css")).await.unwrap().is_none());
    assert!(!edge.file("static/site.css").exists());
    assert!(store.get(&edge.key("/static/logo.png")).await.unwrap().is_some());
    assert!(edge.file("static/logo.png").exists());

    let (_, headers, _) = edge.get("/static/logo.png").await;
    assert_eq!(headers["x-cache-status"], "HIT");
}
