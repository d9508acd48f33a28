//! Fetch pipeline errors.

use edge_cache::CacheError;
use edge_core::EdgeError;
use edge_data::FetchError;
use http::StatusCode;

/// Why the fetch path could not answer from origin.
///
/// Every variant degrades to a redirect; none reaches the client as an
/// error page.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Origin unreachable, timed out, or the body broke.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Origin answered, but not with 200 OK.
    #[error("origin answered {status} for {url}")]
    NotOk { status: StatusCode, url: String },

    /// Content type is outside the admission list.
    #[error("content type '{content_type}' is not cacheable")]
    Inadmissible { content_type: String },

    /// Local storage failed.
    #[error(transparent)]
    Storage(#[from] CacheError),
}

impl PipelineError {
    /// Whether this is an expected pass-through rather than a fault.
    pub fn is_pass_through(&self) -> bool {
        matches!(self, Self::Inadmissible { .. } | Self::NotOk { .. })
    }
}

impl From<PipelineError> for EdgeError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Fetch(e) => e.into(),
            e @ (PipelineError::NotOk { .. } | PipelineError::Inadmissible { .. }) => {
                EdgeError::Network(e.to_string())
            }
            PipelineError::Storage(e) => e.into(),
        }
    }
}
