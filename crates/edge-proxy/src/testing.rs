//! Scripted origin for unit tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use edge_cache::MemoryStore;
use edge_core::{ManualClock, OriginConfig, OriginProtocol};
use edge_data::{FetchError, OriginClient, OriginHead, OriginResponse};
use futures::stream::{self, StreamExt};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

use crate::context::EdgeContext;

pub const ORIGIN_HOST: &str = "origin.test";

pub fn origin_config() -> OriginConfig {
    OriginConfig::new(OriginProtocol::Http, ORIGIN_HOST).unwrap()
}

pub fn url(path: &str) -> String {
    format!("http://{ORIGIN_HOST}{path}")
}

#[derive(Debug, Clone)]
pub struct FakeAsset {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub break_body: bool,
}

impl FakeAsset {
    pub fn new(content_type: &'static str, body: &'static [u8]) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static(content_type));
        Self {
            status: StatusCode::OK,
            headers,
            body: Bytes::from_static(body),
            break_body: false,
        }
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(value).unwrap(),
        );
        self
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn broken_body(mut self) -> Self {
        self.break_body = true;
        self
    }
}

/// Origin double: canned assets by URL, request counters, and an outage switch.
#[derive(Default)]
pub struct FakeOrigin {
    assets: Mutex<HashMap<String, FakeAsset>>,
    down: AtomicBool,
    heads: AtomicUsize,
    gets: AtomicUsize,
}

impl FakeOrigin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve(&self, path: &str, asset: FakeAsset) {
        self.assets.lock().unwrap().insert(url(path), asset);
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn heads(&self) -> usize {
        self.heads.load(Ordering::SeqCst)
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    fn lookup(&self, url: &str) -> Result<FakeAsset, FetchError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(FetchError::Connection("connection refused".into()));
        }
        Ok(self
            .assets
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| FakeAsset::new("text/plain", b"").status(StatusCode::NOT_FOUND)))
    }
}

#[async_trait]
impl OriginClient for FakeOrigin {
    async fn head(&self, url: &str) -> Result<OriginHead, FetchError> {
        self.heads.fetch_add(1, Ordering::SeqCst);
        let asset = self.lookup(url)?;
        Ok(OriginHead {
            status: asset.status,
            headers: asset.headers,
        })
    }

    async fn get(&self, url: &str) -> Result<OriginResponse, FetchError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let asset = self.lookup(url)?;
        let mut chunks: Vec<Result<Bytes, FetchError>> = asset
            .body
            .chunks(4)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        if asset.break_body {
            chunks.push(Err(FetchError::Body("connection reset".into())));
        }
        Ok(OriginResponse {
            status: asset.status,
            headers: asset.headers,
            body: stream::iter(chunks).boxed(),
        })
    }
}

pub struct Harness {
    pub ctx: EdgeContext,
    pub origin: Arc<FakeOrigin>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
}

pub const START: i64 = 1_700_000_000;

pub fn harness(cache_root: &Path) -> Harness {
    let origin = Arc::new(FakeOrigin::new());
    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(START));
    let ctx = EdgeContext::new(
        origin_config(),
        cache_root,
        store.clone(),
        origin.clone(),
    )
    .with_clock(clock.clone());
    Harness {
        ctx,
        origin,
        store,
        clock,
    }
}

pub async fn collect_body(body: axum::body::Body) -> Vec<u8> {
    let mut stream = body.into_data_stream();
    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => out.extend_from_slice(&bytes),
            Err(_) => break,
        }
    }
    out
}
