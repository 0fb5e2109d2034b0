//! Request inspection.
//!
//! # Responsibilities
//! - Decide whether a request is worth buffering (`needs_inspection`)
//! - Run the fixed rule set over a buffered body (`evaluate`)
//!
//! # Design Decisions
//! - Only POSTs to activity-carrying endpoints are inspected
//! - A body that is not a JSON object always passes
//! - Rules run in a fixed order and the first failure wins

use axum::http::{header, HeaderMap, Method, Uri};

use super::activity::Activity;
use super::verdict::{Finding, Rejection, Rule, Verdict};
use crate::config::LimitConfig;

/// Endpoints that carry activities, matched exactly.
pub const INSPECTED_PATHS: [&str; 3] = ["/api/i/update", "/api/notes/create", "/inbox"];

/// Per-user inbox endpoints live under this prefix.
pub const INSPECTED_PREFIX: &str = "/users/";

/// Matched as case-insensitive prefixes of the Content-Type header.
pub const INSPECTED_CONTENT_TYPES: [&str; 3] = [
    "application/json",
    "application/activity+json",
    "application/ld+json",
];

pub fn is_inspected_path(path: &str) -> bool {
    INSPECTED_PATHS.contains(&path) || path.starts_with(INSPECTED_PREFIX)
}

/// The Content-Type header, trimmed and lowercased, parameters included.
pub fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default()
}

/// Activity payloads are recognised by a media type prefix.
pub fn is_inspected_content_type(content_type: &str) -> bool {
    INSPECTED_CONTENT_TYPES
        .iter()
        .any(|prefix| content_type.starts_with(prefix))
}

/// The declared Content-Length, if present and valid.
pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Whether the request body should be buffered and evaluated.
///
/// Requests that reach an inspected endpoint but are skipped anyway
/// (odd content type, unknown or oversized body) are logged.
pub fn needs_inspection(method: &Method, uri: &Uri, headers: &HeaderMap, limits: &LimitConfig) -> bool {
    if method != Method::POST {
        return false;
    }

    let path = uri.path();
    if !is_inspected_path(path) {
        return false;
    }

    let content_type = content_type(headers);
    if !is_inspected_content_type(&content_type) {
        tracing::warn!(
            path = %path,
            content_type = %content_type,
            "Skipping inspection for unexpected content type"
        );
        return false;
    }

    match declared_length(headers) {
        Some(length) if length <= limits.max_body_size => true,
        Some(length) => {
            tracing::warn!(
                path = %path,
                content_length = length,
                max_body_size = limits.max_body_size,
                "Skipping inspection for oversized body"
            );
            false
        }
        None => {
            tracing::warn!(path = %path, "Skipping inspection for body of unknown length");
            false
        }
    }
}

/// Evaluate the rules against a buffered body.
pub fn evaluate(body: &[u8], limits: &LimitConfig) -> Verdict {
    let Some(activity) = Activity::parse(body) else {
        return Verdict::Pass;
    };

    if activity.cc_count > limits.max_cc {
        return reject_count(Rule::CcCount, activity.cc_count, limits.max_cc);
    }

    let mentions = activity.mention_count();
    if mentions > limits.max_mentions {
        return reject_count(Rule::MentionCount, mentions, limits.max_mentions);
    }

    if let Some(content) = activity.resolved_content().filter(|c| !c.is_empty()) {
        let hit = limits
            .keywords
            .iter()
            .find(|keyword| !keyword.is_empty() && content.contains(keyword.as_str()));
        if let Some(keyword) = hit {
            return Verdict::Reject(Rejection {
                rule: Rule::Keyword,
                finding: Finding::Keyword(keyword.clone()),
            });
        }
    }

    Verdict::Pass
}

fn reject_count(rule: Rule, found: usize, limit: usize) -> Verdict {
    Verdict::Reject(Rejection {
        rule,
        finding: Finding::Count { found, limit },
    })
}
