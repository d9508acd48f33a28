//! Redirect fallback to the origin.

use axum::body::Body;
use axum::response::Response;
use http::header::{CACHE_CONTROL, LOCATION};
use http::{HeaderValue, StatusCode};

/// `302 Found` pointing the client at `url`.
///
/// The redirect itself is marked uncacheable. A URL that cannot be sent as
/// a header yields `502 Bad Gateway`.
pub fn redirect_to_origin(url: &str) -> Response {
    let Ok(location) = HeaderValue::from_str(url) else {
        tracing::warn!(url, "origin url is not a valid header value");
        return status_only(StatusCode::BAD_GATEWAY);
    };

    let mut response = status_only(StatusCode::FOUND);
    response.headers_mut().insert(LOCATION, location);
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

fn status_only(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}
