//! Origin client.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use edge_core::EdgeError;
use futures::stream::{self, BoxStream, StreamExt};
use http::{HeaderMap, Method, StatusCode};

use crate::timeout::{TimeoutConfig, TimeoutError};

/// Error type for fetch operations.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Timeout: {0}")]
    Timeout(#[from] TimeoutError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Request error: {0}")]
    Request(String),

    #[error("Body error: {0}")]
    Body(String),
}

impl FetchError {
    fn from_reqwest(err: reqwest::Error, timeouts: &TimeoutConfig) -> Self {
        if err.is_connect() {
            if err.is_timeout() {
                return Self::Timeout(TimeoutError::Connect(timeouts.connect));
            }
            return Self::Connection(err.to_string());
        }
        if err.is_timeout() {
            return Self::Timeout(TimeoutError::Response(timeouts.response));
        }
        Self::Request(err.to_string())
    }
}

impl From<FetchError> for EdgeError {
    fn from(err: FetchError) -> Self {
        EdgeError::Network(err.to_string())
    }
}

/// Streaming response body.
pub type BodyStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Status and headers of an origin HEAD.
#[derive(Debug, Clone)]
pub struct OriginHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl OriginHead {
    /// Value of a header as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// An origin GET whose body has not been read yet.
pub struct OriginResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: BodyStream,
}

impl fmt::Debug for OriginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OriginResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Access to the origin server.
///
/// Implementations must bound every wait; a hung origin surfaces as
/// [`FetchError::Timeout`].
#[async_trait]
pub trait OriginClient: Send + Sync {
    /// Fetch status and headers only.
    async fn head(&self, url: &str) -> Result<OriginHead, FetchError>;

    /// Start a GET; the body streams as it arrives.
    async fn get(&self, url: &str) -> Result<OriginResponse, FetchError>;
}

/// Origin client backed by `reqwest`.
#[derive(Clone)]
pub struct ReqwestOrigin {
    client: reqwest::Client,
    timeouts: TimeoutConfig,
}

impl ReqwestOrigin {
    /// Build a client with the given timeouts.
    pub fn new(timeouts: TimeoutConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeouts.connect)
            .user_agent(concat!("edge-cdn/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::Request(format!("failed to create HTTP client: {e}")))?;

        Ok(Self { client, timeouts })
    }

    async fn send(&self, method: Method, url: &str) -> Result<reqwest::Response, FetchError> {
        let request = self.client.request(method.clone(), url).send();
        let response = tokio::time::timeout(self.timeouts.response, request)
            .await
            .map_err(|_| TimeoutError::Response(self.timeouts.response))?
            .map_err(|e| FetchError::from_reqwest(e, &self.timeouts))?;

        tracing::debug!(%method, url, status = %response.status(), "origin responded");
        Ok(response)
    }
}

#[async_trait]
impl OriginClient for ReqwestOrigin {
    async fn head(&self, url: &str) -> Result<OriginHead, FetchError> {
        let response = self.send(Method::HEAD, url).await?;
        Ok(OriginHead {
            status: response.status(),
            headers: response.headers().clone(),
        })
    }

    async fn get(&self, url: &str) -> Result<OriginResponse, FetchError> {
        let response = self.send(Method::GET, url).await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = idle_bounded(response.bytes_stream().boxed(), self.timeouts.idle);

        Ok(OriginResponse {
            status,
            headers,
            body,
        })
    }
}

/// Wrap a body so that each chunk must arrive within `idle`.
///
/// The stream ends after the first error.
fn idle_bounded(
    body: BoxStream<'static, reqwest::Result<Bytes>>,
    idle: std::time::Duration,
) -> BodyStream {
    stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(idle, body.next()).await {
            Ok(Some(Ok(chunk))) => Some((Ok(chunk), Some(body))),
            Ok(Some(Err(e))) => Some((Err(FetchError::Body(e.to_string())), None)),
            Ok(None) => None,
            Err(_) => Some((Err(FetchError::Timeout(TimeoutError::Idle(idle))), None)),
        }
    })
    .boxed()
}
