//! Header manipulation for forwarded requests and relayed responses.
//!
//! # Responsibilities
//! - Strip hop-by-hop headers in both directions
//! - Fold X-Forwarded-For, X-Forwarded-Host and X-Forwarded-Proto
//!
//! # Design Decisions
//! - Headers named in `Connection` are hop-by-hop for that message too
//! - A forwarding header that is present but empty suppresses our value

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");
pub const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");

/// Headers that describe a single connection and must not be forwarded.
pub const HOP_BY_HOP_HEADERS: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in named.iter().chain(HOP_BY_HOP_HEADERS.iter()) {
        headers.remove(name);
    }
}

/// Append `value` to a forwarding header.
///
/// Prior values are joined with ", " before our value. If the header is
/// present but every value is empty, it is left untouched.
pub fn append_forwarded(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    let prior: Vec<&str> = headers
        .get_all(&name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    if !prior.is_empty() && prior.iter().all(|v| v.is_empty()) {
        return;
    }

    let folded = if prior.is_empty() {
        value.to_string()
    } else {
        format!("{}, {}", prior.join(", "), value)
    };

    match HeaderValue::from_str(&folded) {
        Ok(folded) => {
            headers.insert(name, folded);
        }
        Err(_) => {
            tracing::debug!(header = %name, "Skipping unrepresentable forwarding header");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_standard_and_connection_named_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive, x-session"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("x-session", HeaderValue::from_static("abc"));
        headers.insert(header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }

    #[test]
    fn appends_to_existing_chain() {
        let mut headers = HeaderMap::new();
        headers.append(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.1"));
        headers.append(X_FORWARDED_FOR, HeaderValue::from_static("10.0.0.2"));

        append_forwarded(&mut headers, X_FORWARDED_FOR, "192.0.2.7");

        assert_eq!(headers.get_all(X_FORWARDED_FOR).iter().count(), 1);
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.1, 10.0.0.2, 192.0.2.7");
    }

    #[test]
    fn sets_when_absent() {
        let mut headers = HeaderMap::new();
        append_forwarded(&mut headers, X_FORWARDED_PROTO, "http");
        assert_eq!(headers[X_FORWARDED_PROTO], "http");
    }

    #[test]
    fn empty_header_suppresses() {
        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static(""));
        append_forwarded(&mut headers, X_FORWARDED_FOR, "192.0.2.7");
        assert_eq!(headers[X_FORWARDED_FOR], "");
    }
}
