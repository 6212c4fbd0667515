//! HEAD metadata probe.
//!
//! Redirects are disabled at the transport layer: relative redirects are
//! re-issued manually at the same origin, absolute ones are never followed
//! because they point at signed CDN URLs where the authorization header
//! must not be replayed. `Accept-Encoding: identity` keeps the advertised
//! length equal to the on-wire size.

use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT_ENCODING, CONTENT_LENGTH, CONTENT_RANGE, LOCATION};
use reqwest::Url;
use tracing::debug;

use hubcache_core::{normalize_etag, HubError, Result};

use crate::backoff::{self, BackoffPolicy, RetryBody};
use crate::classify::classify_response;
use crate::session::HttpSession;

const HEADER_REPO_COMMIT: &str = "X-Repo-Commit";
const HEADER_LINKED_ETAG: &str = "X-Linked-Etag";
const HEADER_LINKED_SIZE: &str = "X-Linked-Size";
const HEADER_XET_HASH: &str = "X-Xet-Hash";
const HEADER_XET_REFRESH_ROUTE: &str = "X-Xet-Refresh-Route";

const MAX_RELATIVE_REDIRECTS: usize = 10;

/// Everything the xet transport needs to take over a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XetDescriptor {
    /// Content-defined hash of the file.
    pub file_hash: String,
    /// Route used to refresh the short-lived access token.
    pub refresh_route: String,
}

/// Metadata of one file at one revision, as advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Commit hash the probed revision resolves to.
    pub commit_hash: String,
    /// Normalized etag of the content.
    pub etag: String,
    /// Size of the content in bytes.
    pub size: u64,
    /// Where the bytes live: the redirect target, or the probed URL.
    pub location: String,
    /// Present when the server offers the xet transport for this file.
    pub xet: Option<XetDescriptor>,
}

impl FileMetadata {
    /// True when the bytes live on a different host than the probed URL,
    /// in which case the authorization header must be stripped from the
    /// GET that follows.
    pub fn is_cross_host(&self, probed_url: &str) -> bool {
        match (Url::parse(probed_url), Url::parse(&self.location)) {
            (Ok(a), Ok(b)) => a.host_str() != b.host_str(),
            _ => false,
        }
    }
}

/// Probes `url` with HEAD and extracts the file metadata.
pub async fn fetch_metadata(
    session: &HttpSession,
    url: &str,
    headers: &HeaderMap,
    timeout: Duration,
) -> Result<FileMetadata> {
    let policy = BackoffPolicy::default();
    let mut current = url.to_string();

    for _ in 0..MAX_RELATIVE_REDIRECTS {
        let request_url = current.clone();
        let request_headers = headers.clone();
        let response = backoff::execute(&policy, session, RetryBody::Empty, move |session| {
            session
                .no_redirect_client()
                .head(request_url.clone())
                .headers(request_headers.clone())
                .header(ACCEPT_ENCODING, "identity")
                .timeout(timeout)
        })
        .await?;

        let status = response.status();
        if status.is_redirection() {
            if let Some(target) = header_str(response.headers(), LOCATION.as_str()) {
                if let Some(next) = relative_redirect(&current, &target) {
                    debug!(from = %current, to = %next, "following relative redirect");
                    current = next;
                    continue;
                }
            }
            // Absolute redirect: the metadata lives on this response.
            return extract(url, &current, response.headers(), status.as_u16());
        }

        if !status.is_success() {
            let status = status.as_u16();
            let response_headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(
                &current,
                status,
                &response_headers,
                None,
                &body,
            ));
        }

        return extract(url, &current, response.headers(), status.as_u16());
    }

    Err(HubError::FileMetadata {
        url: url.to_string(),
        reason: format!("more than {MAX_RELATIVE_REDIRECTS} relative redirects"),
    })
}

fn extract(
    probed_url: &str,
    final_url: &str,
    headers: &HeaderMap,
    status: u16,
) -> Result<FileMetadata> {
    let commit_hash = header_str(headers, HEADER_REPO_COMMIT).ok_or_else(|| {
        HubError::FileMetadata {
            url: probed_url.to_string(),
            reason: format!("missing {HEADER_REPO_COMMIT} header (status {status})"),
        }
    })?;

    let etag = header_str(headers, HEADER_LINKED_ETAG)
        .or_else(|| header_str(headers, "ETag"))
        .map(|raw| normalize_etag(&raw))
        .ok_or_else(|| HubError::FileMetadata {
            url: probed_url.to_string(),
            reason: "missing etag header".to_string(),
        })?;

    let size = header_str(headers, HEADER_LINKED_SIZE)
        .and_then(|raw| raw.trim().parse::<u64>().ok())
        .or_else(|| response_length(headers))
        .ok_or_else(|| HubError::FileMetadata {
            url: probed_url.to_string(),
            reason: "missing content length".to_string(),
        })?;

    let location =
        header_str(headers, LOCATION.as_str()).unwrap_or_else(|| final_url.to_string());

    let xet = xet_descriptor(headers);

    debug!(
        url = probed_url,
        commit = %commit_hash,
        etag = %etag,
        size,
        xet = xet.is_some(),
        "probed file metadata"
    );

    Ok(FileMetadata {
        commit_hash,
        etag,
        size,
        location,
        xet,
    })
}

/// Advertised body length: the `Content-Range` total wins, then
/// `Content-Length`.
pub fn response_length(headers: &HeaderMap) -> Option<u64> {
    if let Some(range) = header_str(headers, CONTENT_RANGE.as_str()) {
        if let Some(total) = range.rsplit('/').next() {
            if let Ok(total) = total.trim().parse::<u64>() {
                return Some(total);
            }
        }
    }
    header_str(headers, CONTENT_LENGTH.as_str())?.trim().parse().ok()
}

/// Resolves `target` against `current` when it is a relative redirect;
/// absolute targets yield `None`.
fn relative_redirect(current: &str, target: &str) -> Option<String> {
    match Url::parse(target) {
        Ok(_) => None,
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(current).ok()?;
            base.join(target).ok().map(|u| u.to_string())
        }
        Err(_) => None,
    }
}

fn xet_descriptor(headers: &HeaderMap) -> Option<XetDescriptor> {
    let file_hash = header_str(headers, HEADER_XET_HASH)?;
    let refresh_route = header_str(headers, HEADER_XET_REFRESH_ROUTE)
        .or_else(|| link_header_target(headers, "xet-auth"))?;
    Some(XetDescriptor {
        file_hash,
        refresh_route,
    })
}

/// Finds the target of a `Link` header entry with the given relation.
pub fn link_header_target(headers: &HeaderMap, rel: &str) -> Option<String> {
    let needle = format!("rel=\"{rel}\"");
    for value in headers.get_all("Link") {
        let Ok(value) = value.to_str() else { continue };
        for entry in value.split(',') {
            let mut parts = entry.split(';');
            let target = parts.next()?.trim();
            let matches_rel = parts.any(|p| p.trim() == needle);
            if matches_rel {
                return Some(
                    target
                        .trim_start_matches('<')
                        .trim_end_matches('>')
                        .to_string(),
                );
            }
        }
    }
    None
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                name.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    const COMMIT: &str = "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef";

    #[test]
    fn test_extract_happy_path() {
        let map = headers(&[
            ("X-Repo-Commit", COMMIT),
            ("ETag", "\"abc123\""),
            ("Content-Length", "391"),
        ]);
        let meta = extract("https://hub/f", "https://hub/f", &map, 200).unwrap();
        assert_eq!(meta.commit_hash, COMMIT);
        assert_eq!(meta.etag, "abc123");
        assert_eq!(meta.size, 391);
        assert_eq!(meta.location, "https://hub/f");
        assert!(meta.xet.is_none());
    }

    #[test]
    fn test_extract_prefers_linked_headers() {
        let map = headers(&[
            ("X-Repo-Commit", COMMIT),
            ("ETag", "\"weak\""),
            ("X-Linked-Etag", "\"strong\""),
            ("Content-Length", "10"),
            ("X-Linked-Size", "321000000"),
        ]);
        let meta = extract("https://hub/f", "https://hub/f", &map, 200).unwrap();
        assert_eq!(meta.etag, "strong");
        assert_eq!(meta.size, 321_000_000);
    }

    #[test]
    fn test_extract_missing_commit_is_metadata_error() {
        let map = headers(&[("ETag", "\"abc\""), ("Content-Length", "1")]);
        let err = extract("https://hub/f", "https://hub/f", &map, 200).unwrap_err();
        assert!(matches!(err, HubError::FileMetadata { .. }));
    }

    #[test]
    fn test_extract_location_header_wins() {
        let map = headers(&[
            ("X-Repo-Commit", COMMIT),
            ("ETag", "\"abc\""),
            ("Content-Length", "1"),
            ("Location", "https://cdn.example/signed"),
        ]);
        let meta = extract("https://hub/f", "https://hub/f", &map, 302).unwrap();
        assert_eq!(meta.location, "https://cdn.example/signed");
        assert!(meta.is_cross_host("https://hub/f"));
    }

    #[test]
    fn test_response_length_prefers_content_range_total() {
        let map = headers(&[
            ("Content-Range", "bytes 0-0/10485760"),
            ("Content-Length", "1"),
        ]);
        assert_eq!(response_length(&map), Some(10_485_760));

        let map = headers(&[("Content-Length", "42")]);
        assert_eq!(response_length(&map), Some(42));

        let map = headers(&[("Content-Range", "bytes */*"), ("Content-Length", "7")]);
        assert_eq!(response_length(&map), Some(7));
    }

    #[test]
    fn test_relative_redirect_resolution() {
        assert_eq!(
            relative_redirect("https://hub/a/b", "/c/d?sig=1").as_deref(),
            Some("https://hub/c/d?sig=1")
        );
        assert_eq!(
            relative_redirect("https://hub/a", "https://cdn.example/x"),
            None
        );
    }

    #[test]
    fn test_xet_descriptor_from_headers() {
        let map = headers(&[
            ("X-Xet-Hash", "abcd"),
            ("X-Xet-Refresh-Route", "/api/refresh"),
        ]);
        assert_eq!(
            xet_descriptor(&map),
            Some(XetDescriptor {
                file_hash: "abcd".to_string(),
                refresh_route: "/api/refresh".to_string(),
            })
        );
    }

    #[test]
    fn test_xet_descriptor_from_link_header() {
        let map = headers(&[
            ("X-Xet-Hash", "abcd"),
            (
                "Link",
                "<https://hub/api/xet-auth>; rel=\"xet-auth\", <https://hub/next>; rel=\"next\"",
            ),
        ]);
        assert_eq!(
            xet_descriptor(&map).unwrap().refresh_route,
            "https://hub/api/xet-auth"
        );
    }

    #[test]
    fn test_xet_descriptor_requires_hash() {
        let map = headers(&[("X-Xet-Refresh-Route", "/api/refresh")]);
        assert_eq!(xet_descriptor(&map), None);
    }

    #[test]
    fn test_link_header_target() {
        let map = headers(&[("Link", "<https://hub/page2>; rel=\"next\"")]);
        assert_eq!(
            link_header_target(&map, "next").as_deref(),
            Some("https://hub/page2")
        );
        assert_eq!(link_header_target(&map, "prev"), None);
    }
}
