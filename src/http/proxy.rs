//! The proxy handler.
//!
//! Every request reads one config snapshot and uses it throughout, so a
//! reload in the middle of a request never mixes old and new settings.

use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{header, HeaderMap, HeaderValue, Request, StatusCode};
use axum::response::Response;

use super::request::{build_outbound, read_body, BodyError, X_REQUEST_ID};
use super::response::{json_response, rejection_response, relay_response};
use super::server::AppState;
use crate::net::PeerAddr;
use crate::observability::metrics::{self, Outcome};
use crate::policy::{inspector, Verdict};
use crate::security::{resolve_client, ClientContext};
use crate::transport::TransportError;

pub async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<PeerAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let config = state.store.current();
    let (parts, body) = request.into_parts();

    let request_id = header_or(&parts.headers, X_REQUEST_ID.as_str(), "unknown");
    let request_id_header = parts.headers.get(X_REQUEST_ID).cloned();
    let user_agent = header_or(&parts.headers, header::USER_AGENT.as_str(), "");
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();

    // 1. Client identity
    let client = resolve_client(&peer, &parts.headers, &config);

    // 2. Inspection
    let body = if inspector::needs_inspection(&parts.method, &parts.uri, &parts.headers, &config.limits) {
        let read_timeout = config.listen.timeouts().read;
        let bytes = match read_body(body, config.limits.max_body_size, read_timeout).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let status = match e {
                    BodyError::Timeout => StatusCode::REQUEST_TIMEOUT,
                    BodyError::Read(_) => StatusCode::BAD_REQUEST,
                };
                tracing::warn!(
                    request_id = %request_id,
                    path = %path,
                    peer = %peer,
                    error = %e,
                    "Failed to buffer request body"
                );
                metrics::record_request(Outcome::ClientError);
                return with_request_id(
                    json_response(status, "Failed to read request body."),
                    request_id_header,
                );
            }
        };

        if let Verdict::Reject(rejection) = inspector::evaluate(&bytes, &config.limits) {
            tracing::warn!(
                request_id = %request_id,
                path = %path,
                peer = %peer,
                client = %display_client(&client),
                user_agent = %user_agent,
                reason = rejection.reason(),
                finding = %rejection.finding,
                body = %String::from_utf8_lossy(&bytes),
                "Request rejected"
            );
            metrics::record_rejection(rejection.rule.as_str());
            metrics::record_request(Outcome::Rejected);
            return rejection_response(&path, rejection.rule.client_message());
        }

        Body::from(bytes)
    } else {
        body
    };

    // 3. Transport for this snapshot
    let transport = match state.transports.for_snapshot(&config) {
        Ok(transport) => transport,
        Err(e) => return with_request_id(upstream_failure(&request_id, &path, &e), request_id_header),
    };

    // 4. Rewrite
    let outbound = match build_outbound(parts, body, transport.target(), &client) {
        Ok(outbound) => outbound,
        Err(e) => {
            tracing::error!(request_id = %request_id, path = %path, error = %e, "Failed to build upstream request");
            metrics::record_request(Outcome::UpstreamError);
            return with_request_id(
                json_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to build upstream request."),
                request_id_header,
            );
        }
    };

    // 5. Forward
    let upstream_start = Instant::now();
    match transport.dispatch(outbound).await {
        Ok(response) => {
            metrics::record_upstream_latency(upstream_start);
            metrics::record_request(Outcome::Forwarded);

            let status = response.status().as_u16();
            let elapsed_ms = start.elapsed().as_millis() as u64;
            let client = display_client(&client);
            if config.listen.debug {
                tracing::info!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    client = %client,
                    user_agent = %user_agent,
                    status,
                    elapsed_ms,
                    "Request forwarded"
                );
            } else {
                tracing::debug!(
                    request_id = %request_id,
                    method = %method,
                    path = %path,
                    client = %client,
                    status,
                    elapsed_ms,
                    "Request forwarded"
                );
            }

            with_request_id(relay_response(response), request_id_header)
        }
        Err(e) => with_request_id(upstream_failure(&request_id, &path, &e), request_id_header),
    }
}

/// Echo the request id on everything except synthesized rejections,
/// which carry a fixed header set.
fn with_request_id(mut response: Response, id: Option<HeaderValue>) -> Response {
    if let Some(id) = id {
        response.headers_mut().insert(X_REQUEST_ID, id);
    }
    response
}

fn upstream_failure(request_id: &str, path: &str, error: &TransportError) -> Response {
    metrics::record_request(Outcome::UpstreamError);
    if error.is_timeout() {
        tracing::error!(request_id = %request_id, path = %path, error = %error, "Upstream timed out");
        json_response(StatusCode::GATEWAY_TIMEOUT, "Upstream timed out.")
    } else {
        tracing::error!(request_id = %request_id, path = %path, error = %error, "Upstream unreachable");
        json_response(StatusCode::BAD_GATEWAY, "Upstream unreachable.")
    }
}

fn header_or(headers: &HeaderMap, name: &str, default: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(default)
        .to_string()
}

fn display_client(client: &ClientContext) -> &str {
    client.remote_addr.as_deref().unwrap_or("unix")
}
