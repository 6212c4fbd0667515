//! Maps failing HTTP responses to the domain error taxonomy.
//!
//! The server signals intent through `X-Error-Code` / `X-Error-Message`
//! hints; the status code alone is not trusted. Notably, a 401 on a
//! repo-shaped URL is reclassified as "repository not found" because the
//! server is deliberately ambiguous about the existence of private and
//! gated repositories.

use std::sync::OnceLock;

use regex::Regex;
use reqwest::header::HeaderMap;

use hubcache_core::{HubError, HubHttpError};

const HEADER_ERROR_CODE: &str = "X-Error-Code";
const HEADER_ERROR_MESSAGE: &str = "X-Error-Message";
const HEADER_REQUEST_ID: &str = "x-request-id";
const HEADER_TRACE_ID: &str = "X-Amzn-Trace-Id";

const DISABLED_MESSAGE: &str = "Access to this resource is disabled.";
const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid credentials in Authorization header.";

/// URL shapes owned by the repo API: `/api/{models,datasets,spaces}/...`
/// and `/{repo}/resolve/...`.
fn repo_api_shape() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https://[^/]+(/api/(models|datasets|spaces)/.+|/.+/resolve/.+)")
            .expect("repo API shape regex")
    })
}

/// Classifies a failing response into a [`HubError`].
///
/// `request_range` is the `Range` the caller sent, quoted back on 416.
/// `body` is the response body text, mined for `error` / `errors[*].message`.
pub fn classify_response(
    url: &str,
    status: u16,
    headers: &HeaderMap,
    request_range: Option<&str>,
    body: &str,
) -> HubError {
    let error_code = header_str(headers, HEADER_ERROR_CODE);
    let error_message = header_str(headers, HEADER_ERROR_MESSAGE);
    let request_id = header_str(headers, HEADER_REQUEST_ID)
        .or_else(|| header_str(headers, HEADER_TRACE_ID));

    let mut ctx = HubHttpError::new(url, format!("HTTP error {status} for url: {url}"))
        .with_status(status)
        .with_request_id(request_id)
        .with_commit_hash(header_str(headers, "X-Repo-Commit"));
    if let Some(message) = &error_message {
        ctx.push_server_message(message.clone());
    }
    for message in body_messages(body) {
        ctx.push_server_message(message);
    }

    match error_code.as_deref() {
        Some("RevisionNotFound") => {
            ctx.append("revision not found");
            return HubError::RevisionNotFound(ctx.finalize());
        }
        Some("EntryNotFound") => {
            ctx.append("entry not found");
            return HubError::EntryNotFound(ctx.finalize());
        }
        Some("GatedRepo") => {
            ctx.append("access to this repo is gated; visit the repo page to request access");
            return HubError::GatedRepo(ctx.finalize());
        }
        _ => {}
    }

    if error_message.as_deref() == Some(DISABLED_MESSAGE) {
        return HubError::DisabledRepo(ctx.finalize());
    }

    let ambiguous_401 = status == 401
        && error_message.as_deref() != Some(INVALID_CREDENTIALS_MESSAGE)
        && repo_api_shape().is_match(url);
    if error_code.as_deref() == Some("RepoNotFound") || ambiguous_401 {
        ctx.append(
            "repository not found; if it is private or gated, \
             make sure you are authenticated and authorized",
        );
        return HubError::RepositoryNotFound(ctx.finalize());
    }

    match status {
        400 => HubError::BadRequest(ctx.finalize()),
        403 => {
            ctx.append("your credentials do not grant permission for this resource");
            HubError::Http(ctx.finalize())
        }
        416 => {
            let returned = header_str(headers, "Content-Range").unwrap_or_default();
            ctx.append(&format!(
                "requested range {:?} not satisfiable; server range: {:?}",
                request_range.unwrap_or(""),
                returned
            ));
            HubError::Http(ctx.finalize())
        }
        _ => HubError::Http(ctx.finalize()),
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Pulls server messages out of a JSON error body: the top-level `error`
/// string and every `errors[*].message`.
fn body_messages(body: &str) -> Vec<String> {
    let mut messages = Vec::new();
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return messages;
    };
    if let Some(error) = value.get("error").and_then(|v| v.as_str()) {
        messages.push(error.to_string());
    }
    if let Some(errors) = value.get("errors").and_then(|v| v.as_array()) {
        for entry in errors {
            if let Some(message) = entry.get("message").and_then(|v| v.as_str()) {
                messages.push(message.to_string());
            }
        }
    }
    messages
}
