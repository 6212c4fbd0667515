//! Retry with exponential backoff around a single HTTP request.
//!
//! A response whose status is outside the retry-status set is returned to
//! the caller untouched (classification happens there); a retryable status
//! or a transient transport fault schedules another attempt after a sleep
//! that doubles up to the cap. TLS-class faults reset the session first.

use std::time::Duration;

use tracing::{debug, warn};

use hubcache_core::{HubError, Result};

use crate::session::{is_tls_fault, is_transient_fault, HttpSession};

/// Retry-status set and wait schedule for one request.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Retries consumed after the initial attempt (default 5).
    pub max_retries: u32,
    /// First sleep (default 1 s).
    pub base_wait: Duration,
    /// Sleep cap (default 8 s); growth is `min(max_wait, prev * 2)`.
    pub max_wait: Duration,
    /// Statuses that schedule another attempt (default `{503}`).
    pub retry_statuses: Vec<u16>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(8),
            retry_statuses: vec![503],
        }
    }
}

impl BackoffPolicy {
    /// The default policy extended with 429, used by the snapshot-list
    /// paginator and metadata GETs.
    pub fn with_rate_limit_retry() -> Self {
        Self {
            retry_statuses: vec![503, 429],
            ..Self::default()
        }
    }

    /// Sleep before attempt `n` (0-based retry index).
    fn wait_for(&self, retry: u32) -> Duration {
        let mut wait = self.base_wait;
        for _ in 0..retry {
            wait = std::cmp::min(self.max_wait, wait * 2);
        }
        std::cmp::min(self.max_wait, wait)
    }
}

/// Request body shape, for the restart rule.
///
/// Factories rebuild the request each attempt; `Bytes` bodies replay from
/// the start for free, while a body declared `NonSeekable` at construction
/// fails fast on the second attempt with a clear error.
#[derive(Debug, Clone, Default)]
pub enum RetryBody {
    /// No request body.
    #[default]
    Empty,
    /// In-memory body, restartable on every attempt.
    Bytes(Vec<u8>),
    /// Streaming body with no position to seek back to.
    NonSeekable,
}

/// Issues a request with retry/backoff, returning the final response.
///
/// `build` is called once per attempt and must produce a fresh
/// `RequestBuilder`, picking whichever of the session's clients fits (the
/// body from `body` is attached here so its restart position is under our
/// control).
pub async fn execute<F>(
    policy: &BackoffPolicy,
    session: &HttpSession,
    body: RetryBody,
    mut build: F,
) -> Result<reqwest::Response>
where
    F: FnMut(&HttpSession) -> reqwest::RequestBuilder,
{
    let mut retry = 0u32;
    loop {
        if retry > 0 {
            if let RetryBody::NonSeekable = body {
                return Err(HubError::InvalidArgument(
                    "cannot retry a request with a non-seekable body".to_string(),
                ));
            }
        }

        let mut request = build(session);
        if let RetryBody::Bytes(bytes) = &body {
            request = request.body(bytes.clone());
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if !policy.retry_statuses.contains(&status) {
                    return Ok(response);
                }
                if retry >= policy.max_retries {
                    return Ok(response);
                }
                let wait = policy.wait_for(retry);
                debug!(status, retry, wait_ms = wait.as_millis() as u64, "retrying on status");
                tokio::time::sleep(wait).await;
            }
            Err(error) => {
                if !is_transient_fault(&error) || retry >= policy.max_retries {
                    return Err(HubError::Network(error));
                }
                if is_tls_fault(&error) {
                    session.reset();
                }
                let wait = policy.wait_for(retry);
                warn!(error = %error, retry, wait_ms = wait.as_millis() as u64, "retrying on transport fault");
                tokio::time::sleep(wait).await;
            }
        }
        retry += 1;
    }
}
