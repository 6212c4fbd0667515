//! Error taxonomy shared by every hubcache crate.
//!
//! Server-side failures are classified into domain errors carrying a
//! [`HubHttpError`] payload; local failures (paths, ranges, consistency,
//! option conflicts) get dedicated variants so callers can match on kind
//! instead of parsing messages.

use std::fmt;

use thiserror::Error;

/// Context attached to every error derived from an HTTP response.
///
/// Carries the assembled human message, the deduplicated server-side
/// messages, and the request identifier reported by the server. Higher
/// layers may enrich the message through [`HubHttpError::append`] without
/// losing the original cause.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HubHttpError {
    /// HTTP status code, when a response was received.
    pub status: Option<u16>,
    /// URL of the failed request.
    pub url: String,
    /// Assembled human-readable message.
    pub message: String,
    /// Server-side messages, first occurrence preserved, duplicates dropped.
    pub server_messages: Vec<String>,
    /// Request identifier from `x-request-id` (fallback `X-Amzn-Trace-Id`).
    pub request_id: Option<String>,
    /// Commit hash advertised on the error response, when present.
    /// Drives negative caching of confirmed-absent entries.
    pub commit_hash: Option<String>,
}

impl HubHttpError {
    /// Creates a context for `url` with an initial message.
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            message: message.into(),
            ..Self::default()
        }
    }

    /// Sets the response status code.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the request identifier.
    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    /// Sets the commit hash advertised on the error response.
    pub fn with_commit_hash(mut self, commit_hash: Option<String>) -> Self {
        self.commit_hash = commit_hash;
        self
    }

    /// Records a server-side message, dropping duplicates and preserving
    /// the first occurrence order.
    pub fn push_server_message(&mut self, message: impl Into<String>) {
        let message = message.into();
        if message.is_empty() || self.server_messages.contains(&message) {
            return;
        }
        self.server_messages.push(message);
    }

    /// Appends extra context to the assembled message.
    ///
    /// The hook for higher layers: the cause and server messages are kept
    /// intact, only the human text grows.
    pub fn append(&mut self, extra: &str) {
        if !self.message.is_empty() {
            self.message.push('\n');
        }
        self.message.push_str(extra);
    }

    /// Assembles the final message: the request id is inlined into the
    /// first line when not already present, server messages follow.
    pub fn finalize(mut self) -> Self {
        if let Some(id) = &self.request_id {
            if !self.message.contains(id.as_str()) {
                let mut lines = self.message.splitn(2, '\n');
                let first = lines.next().unwrap_or_default();
                let rest = lines.next();
                let mut assembled = format!("{first} (Request ID: {id})");
                if let Some(rest) = rest {
                    assembled.push('\n');
                    assembled.push_str(rest);
                }
                self.message = assembled;
            }
        }
        for server_message in &self.server_messages {
            if !self.message.contains(server_message.as_str()) {
                self.message.push('\n');
                self.message.push_str(server_message);
            }
        }
        self
    }
}

impl fmt::Display for HubHttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Errors produced by hubcache operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// A token was required but none could be found locally.
    #[error("token required but none found: {0}")]
    LocalTokenNotFound(String),

    /// Offline mode is enabled and the operation needs the network.
    #[error("offline mode is enabled: {0}")]
    OfflineModeEnabled(String),

    /// Unclassified HTTP failure from the Hub.
    #[error("{0}")]
    Http(HubHttpError),

    /// The repository does not exist, is private, or the caller lacks access.
    #[error("{0}")]
    RepositoryNotFound(HubHttpError),

    /// The repository is gated and the caller has not accepted the terms.
    #[error("{0}")]
    GatedRepo(HubHttpError),

    /// Access to the repository has been disabled.
    #[error("{0}")]
    DisabledRepo(HubHttpError),

    /// The requested revision does not exist.
    #[error("{0}")]
    RevisionNotFound(HubHttpError),

    /// The requested file does not exist at the requested revision.
    #[error("{0}")]
    EntryNotFound(HubHttpError),

    /// The server rejected the request as malformed.
    #[error("{0}")]
    BadRequest(HubHttpError),

    /// The file could not be found locally and the network was not usable.
    #[error("cannot find the requested file locally: {0}")]
    LocalEntryNotFound(String),

    /// The metadata probe returned a response missing mandatory fields.
    #[error("invalid metadata for {url}: {reason}")]
    FileMetadata {
        /// Probed URL.
        url: String,
        /// Missing or malformed field.
        reason: String,
    },

    /// A completed transfer does not match the advertised size.
    #[error(
        "consistency check failed: expected {expected} bytes, got {actual} bytes \
         for {path}; retry with force_download to discard the partial file"
    )]
    Consistency {
        /// File the bytes were written to.
        path: String,
        /// Size advertised by the server.
        expected: u64,
        /// Size observed on disk.
        actual: u64,
    },

    /// A filename or pointer path escapes its storage root.
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// Offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A `Range` header could not be adjusted for resumption.
    #[error("invalid range {range:?}: {reason}")]
    InvalidRange {
        /// Offending range expression.
        range: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Contradictory or unusable caller options.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Local filesystem failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Transport-level failure (connect, TLS, timeout, protocol).
    #[error(transparent)]
    Network(#[from] reqwest::Error),
}

impl HubError {
    /// Returns the HTTP context when this error was derived from a response.
    pub fn http_context(&self) -> Option<&HubHttpError> {
        match self {
            HubError::Http(ctx)
            | HubError::RepositoryNotFound(ctx)
            | HubError::GatedRepo(ctx)
            | HubError::DisabledRepo(ctx)
            | HubError::RevisionNotFound(ctx)
            | HubError::EntryNotFound(ctx)
            | HubError::BadRequest(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Mutable access to the HTTP context, for message enrichment.
    pub fn http_context_mut(&mut self) -> Option<&mut HubHttpError> {
        match self {
            HubError::Http(ctx)
            | HubError::RepositoryNotFound(ctx)
            | HubError::GatedRepo(ctx)
            | HubError::DisabledRepo(ctx)
            | HubError::RevisionNotFound(ctx)
            | HubError::EntryNotFound(ctx)
            | HubError::BadRequest(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// True for faults where the request never produced a usable response:
    /// connectivity, TLS, timeouts, local I/O. These are the causes the
    /// single-file coordinator may satisfy from cache.
    pub fn is_network_fault(&self) -> bool {
        match self {
            HubError::Network(_) | HubError::Io(_) => true,
            HubError::FileMetadata { .. } => false,
            _ => false,
        }
    }

    /// True when the server authoritatively denied access: these propagate
    /// through the offline fallback instead of being masked.
    pub fn is_authoritative_nack(&self) -> bool {
        match self {
            HubError::RepositoryNotFound(_)
            | HubError::GatedRepo(_)
            | HubError::DisabledRepo(_)
            | HubError::RevisionNotFound(_) => true,
            HubError::Http(ctx) => ctx.status == Some(401),
            _ => false,
        }
    }
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, HubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_server_message_dedup() {
        let mut ctx = HubHttpError::new("https://x", "boom");
        ctx.push_server_message("first");
        ctx.push_server_message("second");
        ctx.push_server_message("first");
        ctx.push_server_message("");
        assert_eq!(ctx.server_messages, vec!["first", "second"]);
    }

    #[test]
    fn test_finalize_inlines_request_id_into_first_line() {
        let ctx = HubHttpError::new("https://x", "404 error for url https://x\ndetails")
            .with_request_id(Some("req-123".to_string()))
            .finalize();
        let first_line = ctx.message.lines().next().unwrap();
        assert!(first_line.contains("(Request ID: req-123)"));
        assert!(ctx.message.contains("details"));
    }

    #[test]
    fn test_finalize_skips_request_id_already_present() {
        let ctx = HubHttpError::new("https://x", "failed (Request ID: req-123)")
            .with_request_id(Some("req-123".to_string()))
            .finalize();
        assert_eq!(ctx.message.matches("req-123").count(), 1);
    }

    #[test]
    fn test_finalize_appends_server_messages() {
        let mut ctx = HubHttpError::new("https://x", "403 forbidden");
        ctx.push_server_message("you shall not pass");
        let ctx = ctx.finalize();
        assert!(ctx.message.ends_with("you shall not pass"));
    }

    #[test]
    fn test_append_hook_preserves_context() {
        let mut err = HubError::EntryNotFound(HubHttpError::new("https://x", "not found"));
        err.http_context_mut().unwrap().append("try another revision");
        let ctx = err.http_context().unwrap();
        assert!(ctx.message.contains("not found"));
        assert!(ctx.message.contains("try another revision"));
    }

    #[test]
    fn test_authoritative_nack_classification() {
        let ctx = HubHttpError::new("https://x", "x");
        assert!(HubError::RepositoryNotFound(ctx.clone()).is_authoritative_nack());
        assert!(HubError::GatedRepo(ctx.clone()).is_authoritative_nack());
        assert!(HubError::Http(ctx.clone().with_status(401)).is_authoritative_nack());
        assert!(!HubError::Http(ctx.clone().with_status(500)).is_authoritative_nack());
        assert!(!HubError::EntryNotFound(ctx).is_authoritative_nack());
    }

    #[test]
    fn test_io_errors_are_network_faults() {
        let err = HubError::from(std::io::Error::new(std::io::ErrorKind::Other, "nope"));
        assert!(err.is_network_fault());
        assert!(!err.is_authoritative_nack());
    }
}
