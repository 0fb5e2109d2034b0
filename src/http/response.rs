//! Responses the gateway produces itself.
//!
//! # Responsibilities
//! - Build the JSON envelope for rejections and gateway errors
//! - Stamp the product headers on every response
//! - Relay upstream responses without hop-by-hop headers
//!
//! # Design Decisions
//! - Rejected inbox deliveries get 202 so remote servers do not retry
//! - Everything else that is rejected gets 400

use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Response, StatusCode};
use hyper::body::Incoming;
use serde::Serialize;

use crate::security::headers::strip_hop_by_hop;

/// Value of the Server and X-Powered-By headers.
pub const PRODUCT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

pub const X_POWERED_BY: HeaderName = HeaderName::from_static("x-powered-by");

const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

#[derive(Debug, Serialize)]
struct Envelope<'a> {
    code: u16,
    status: &'a str,
    message: &'a str,
}

pub fn set_product_headers(headers: &mut HeaderMap) {
    let product = HeaderValue::from_static(PRODUCT);
    headers.insert(header::SERVER, product.clone());
    headers.insert(X_POWERED_BY, product);
}

/// Status for a rejected request to `path`.
pub fn rejection_status(path: &str) -> StatusCode {
    if path.contains("inbox") {
        StatusCode::ACCEPTED
    } else {
        StatusCode::BAD_REQUEST
    }
}

/// Answer a rejected request without contacting the upstream.
pub fn rejection_response(path: &str, message: &str) -> Response<Body> {
    json_response(rejection_status(path), message)
}

/// Envelope response with `status` and `message`.
pub fn json_response(status: StatusCode, message: &str) -> Response<Body> {
    let envelope = Envelope {
        code: status.as_u16(),
        status: status.canonical_reason().unwrap_or_default(),
        message,
    };
    let body = serde_json::to_vec(&envelope).unwrap_or_default();
    let length = body.len();

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    set_product_headers(headers);
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    response
}

/// Convert an upstream response for the client, streaming the body.
pub fn relay_response(upstream: Response<Incoming>) -> Response<Body> {
    let (mut parts, body) = upstream.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    set_product_headers(&mut parts.headers);
    Response::from_parts(parts, Body::new(body))
}
