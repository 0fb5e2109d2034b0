//! Request handling and transformation.
//!
//! # Responsibilities
//! - Buffer an inspected body under the size cap and read timeout
//! - Map the inbound URI onto the upstream base URL
//! - Build the outbound request (hop-by-hop strip, Host, X-Forwarded-*)
//!
//! # Design Decisions
//! - The client's Host header is forwarded unchanged
//! - Buffered bodies are replayed byte-for-byte
//! - Forwarding headers are folded onto existing chains, never replaced

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::{Request, Uri, Version};
use thiserror::Error;
use url::Url;

use crate::security::headers::{
    append_forwarded, strip_hop_by_hop, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO,
};
use crate::security::ClientContext;

/// Set on every request by the request-id layer and echoed on forwarded and error responses.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Debug, Error)]
pub enum BodyError {
    #[error("failed to read request body: {0}")]
    Read(#[source] axum::Error),
    #[error("timed out reading request body")]
    Timeout,
}

/// Read the whole body, failing past `limit` bytes or after `deadline`.
pub async fn read_body(body: Body, limit: u64, deadline: Option<Duration>) -> Result<Bytes, BodyError> {
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);
    let reading = axum::body::to_bytes(body, limit);
    match deadline {
        Some(deadline) => tokio::time::timeout(deadline, reading)
            .await
            .map_err(|_| BodyError::Timeout)?
            .map_err(BodyError::Read),
        None => reading.await.map_err(BodyError::Read),
    }
}

/// Join the inbound path and query onto the upstream base URL.
///
/// Paths are joined with exactly one slash between them. Queries from both
/// sides are kept, base first.
pub fn upstream_uri(target: &Url, original: &Uri) -> Result<Uri, axum::http::Error> {
    let path = join_paths(target.path(), original.path());

    let base_query = target.query().filter(|q| !q.is_empty());
    let query = original.query().filter(|q| !q.is_empty());
    let path_and_query = match (base_query, query) {
        (Some(base), Some(query)) => format!("{}?{}&{}", path, base, query),
        (Some(query), None) | (None, Some(query)) => format!("{}?{}", path, query),
        (None, None) => path,
    };

    let host = target.host_str().unwrap_or_default();
    let authority = match target.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    Uri::builder()
        .scheme(target.scheme())
        .authority(authority)
        .path_and_query(path_and_query)
        .build()
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

/// The Host the client asked for: the header, or the URI authority on HTTP/2.
pub fn original_host(parts: &Parts) -> Option<HeaderValue> {
    parts.headers.get(header::HOST).cloned().or_else(|| {
        parts
            .uri
            .authority()
            .and_then(|authority| HeaderValue::from_str(authority.as_str()).ok())
    })
}

/// Build the request sent upstream.
pub fn build_outbound(
    parts: Parts,
    body: Body,
    target: &Url,
    client: &ClientContext,
) -> Result<Request<Body>, axum::http::Error> {
    let uri = upstream_uri(target, &parts.uri)?;
    let host = original_host(&parts);

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);

    if let Some(host) = &host {
        headers.insert(header::HOST, host.clone());
    }
    if let Some(addr) = client.forwarded_for() {
        append_forwarded(&mut headers, X_FORWARDED_FOR, &addr);
    }
    if let Some(host) = host.as_ref().and_then(|h| h.to_str().ok()) {
        append_forwarded(&mut headers, X_FORWARDED_HOST, host);
    }
    append_forwarded(&mut headers, X_FORWARDED_PROTO, &client.scheme);

    let mut request = Request::builder()
        .method(parts.method)
        .uri(uri)
        .version(Version::HTTP_11)
        .body(body)?;
    *request.headers_mut() = headers;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().method("POST").uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    fn client(addr: Option<&str>, scheme: &str) -> ClientContext {
        ClientContext {
            remote_addr: addr.map(str::to_string),
            scheme: scheme.to_string(),
        }
    }

    #[test]
    fn joins_paths_with_single_slash() {
        let target = Url::parse("http://127.0.0.1:3000").unwrap();
        let uri = upstream_uri(&target, &"/inbox".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "http://127.0.0.1:3000/inbox");

        let target = Url::parse("https://backend/base/").unwrap();
        let uri = upstream_uri(&target, &"/users/a".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "https://backend/base/users/a");

        let target = Url::parse("https://backend/base").unwrap();
        let uri = upstream_uri(&target, &"/users/a".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "https://backend/base/users/a");
    }

    #[test]
    fn keeps_both_queries() {
        let target = Url::parse("http://backend/?via=gw").unwrap();
        let uri = upstream_uri(&target, &"/inbox?page=2".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "http://backend/inbox?via=gw&page=2");

        let target = Url::parse("http://backend").unwrap();
        let uri = upstream_uri(&target, &"/inbox?page=2".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "http://backend/inbox?page=2");
    }

    #[test]
    fn ipv6_target_keeps_brackets() {
        let target = Url::parse("http://[::1]:8081").unwrap();
        let uri = upstream_uri(&target, &"/".parse().unwrap()).unwrap();
        assert_eq!(uri.to_string(), "http://[::1]:8081/");
    }

    #[test]
    fn outbound_preserves_host_and_folds_forwarding() {
        let parts = parts(
            "/inbox",
            &[
                ("host", "social.example"),
                ("x-forwarded-for", "203.0.113.1"),
                ("connection", "keep-alive"),
                ("keep-alive", "timeout=5"),
                ("content-type", "application/activity+json"),
            ],
        );
        let target = Url::parse("http://127.0.0.1:3000").unwrap();
        let outbound = build_outbound(
            parts,
            Body::empty(),
            &target,
            &client(Some("10.0.0.9:41000"), "http"),
        )
        .unwrap();

        assert_eq!(outbound.uri().to_string(), "http://127.0.0.1:3000/inbox");
        let headers = outbound.headers();
        assert_eq!(headers[header::HOST], "social.example");
        assert_eq!(headers[X_FORWARDED_FOR], "203.0.113.1, 10.0.0.9");
        assert_eq!(headers[X_FORWARDED_HOST], "social.example");
        assert_eq!(headers[X_FORWARDED_PROTO], "http");
        assert!(!headers.contains_key(header::CONNECTION));
        assert!(!headers.contains_key("keep-alive"));
        assert_eq!(headers[header::CONTENT_TYPE], "application/activity+json");
    }

    #[test]
    fn unix_peer_adds_no_forwarded_for() {
        let parts = parts("/", &[("host", "social.example")]);
        let target = Url::parse("http://localhost").unwrap();
        let outbound = build_outbound(parts, Body::empty(), &target, &client(None, "https")).unwrap();
        assert!(!outbound.headers().contains_key(X_FORWARDED_FOR));
        assert_eq!(outbound.headers()[X_FORWARDED_PROTO], "https");
    }

    #[tokio::test]
    async fn body_over_limit_fails() {
        let result = read_body(Body::from("0123456789"), 4, None).await;
        assert!(matches!(result, Err(BodyError::Read(_))));

        let bytes = read_body(Body::from("0123"), 4, Some(Duration::from_secs(1))).await.unwrap();
        assert_eq!(&bytes[..], b"0123");
    }
}
