//! Streaming GET with resumption.
//!
//! Bytes append to the sink starting at `resume_size`; a transient fault
//! mid-body re-issues the request with the bytes already on disk as the
//! new resume offset. The retry budget refills whenever progress is made,
//! so only a connection that keeps dying without delivering anything
//! exhausts it.

use std::io;
use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, RANGE};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use hubcache_core::{HubError, Result};

use crate::backoff::{self, BackoffPolicy, RetryBody};
use crate::classify::classify_response;
use crate::session::{is_tls_fault, HttpSession};

/// Ceiling for the basic single-connection transport (~50 GB).
pub const MAX_BASIC_DOWNLOAD_SIZE: u64 = 50_000_000_000;

/// Transient-fault budget; refilled on every received chunk.
const DEFAULT_RETRY_BUDGET: u32 = 5;

/// Pause before resuming after a mid-body fault.
const RESUME_WAIT: Duration = Duration::from_secs(1);

/// Streams `url` into `sink_path`, appending from `resume_size`.
///
/// The final on-disk length must equal `expected_size` when given,
/// otherwise the transfer fails with a consistency error.
pub async fn http_get(
    session: &HttpSession,
    url: &str,
    sink_path: &Path,
    headers: &HeaderMap,
    resume_size: u64,
    expected_size: Option<u64>,
    displayed_filename: Option<&str>,
    chunk_timeout: Duration,
) -> Result<()> {
    if let Some(expected) = expected_size {
        if expected > MAX_BASIC_DOWNLOAD_SIZE {
            return Err(HubError::InvalidArgument(format!(
                "file is {expected} bytes, above the {MAX_BASIC_DOWNLOAD_SIZE}-byte limit of the \
                 basic transport; enable an accelerated transport to download it"
            )));
        }
    }

    let caller_range = headers
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut sink = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(sink_path)
        .await?;

    let policy = BackoffPolicy::default();
    let mut offset = resume_size;
    let mut budget = DEFAULT_RETRY_BUDGET;
    let mut announced = false;

    'attempts: loop {
        let mut attempt_headers = headers.clone();
        attempt_headers.remove(RANGE);
        if let Some(range) = adjust_range(caller_range.as_deref(), offset)? {
            attempt_headers.insert(RANGE, range.parse().expect("valid range header"));
        }

        let request_url = url.to_string();
        let response =
            backoff::execute(&policy, session, RetryBody::Empty, move |session| {
                session
                    .client()
                    .get(request_url.clone())
                    .headers(attempt_headers.clone())
            })
            .await?;

        let status = response.status();
        if !status.is_success() {
            let status = status.as_u16();
            let response_headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(
                url,
                status,
                &response_headers,
                caller_range.as_deref(),
                &body,
            ));
        }

        if !announced {
            let name = displayed_filename
                .map(str::to_string)
                .or_else(|| disposition_filename(response.headers()))
                .unwrap_or_else(|| url.to_string());
            info!(
                file = %truncate_display_name(&name),
                expected_size = expected_size.unwrap_or(0),
                resume_size,
                "downloading"
            );
            announced = true;
        }

        let mut response = response;
        loop {
            let chunk = match tokio::time::timeout(chunk_timeout, response.chunk()).await {
                Ok(Ok(Some(chunk))) => chunk,
                Ok(Ok(None)) => break,
                Ok(Err(error)) => {
                    if budget == 0 {
                        return Err(HubError::Network(error));
                    }
                    budget -= 1;
                    if is_tls_fault(&error) {
                        session.reset();
                    }
                    warn!(error = %error, offset, budget, "transfer interrupted; resuming");
                    tokio::time::sleep(RESUME_WAIT).await;
                    continue 'attempts;
                }
                Err(_) => {
                    if budget == 0 {
                        return Err(HubError::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("no data received for {}s", chunk_timeout.as_secs()),
                        )));
                    }
                    budget -= 1;
                    warn!(offset, budget, "chunk timeout; resuming");
                    tokio::time::sleep(RESUME_WAIT).await;
                    continue 'attempts;
                }
            };

            sink.write_all(&chunk).await?;
            offset += chunk.len() as u64;
            budget = DEFAULT_RETRY_BUDGET;
        }

        sink.flush().await?;
        break;
    }

    if let Some(expected) = expected_size {
        if offset != expected {
            return Err(HubError::Consistency {
                path: sink_path.display().to_string(),
                expected,
                actual: offset,
            });
        }
    }
    Ok(())
}

/// Translates a caller `Range` header by `resume` bytes.
///
/// `None` caller range with a non-zero resume becomes an open-ended range
/// from the resume offset. Multi-range and inverted expressions are
/// rejected.
pub fn adjust_range(caller: Option<&str>, resume: u64) -> Result<Option<String>> {
    if resume == 0 {
        return Ok(caller.map(str::to_string));
    }
    let Some(raw) = caller else {
        return Ok(Some(format!("bytes={resume}-")));
    };

    let invalid = |reason: &str| HubError::InvalidRange {
        range: raw.to_string(),
        reason: reason.to_string(),
    };

    let spec = raw
        .strip_prefix("bytes=")
        .ok_or_else(|| invalid("only bytes ranges are supported"))?;
    if spec.contains(',') {
        return Err(invalid("multi-range is not supported"));
    }

    if let Some(suffix) = spec.strip_prefix('-') {
        // Suffix form: last N bytes; N shrinks by what is already on disk.
        let n: u64 = suffix.parse().map_err(|_| invalid("malformed suffix range"))?;
        if n <= resume {
            return Err(invalid("suffix already satisfied by resumed bytes"));
        }
        return Ok(Some(format!("bytes=-{}", n - resume)));
    }

    let (start, end) = match spec.split_once('-') {
        Some((start, end)) => (start, end),
        None => return Err(invalid("malformed range")),
    };
    let start: u64 = start.parse().map_err(|_| invalid("malformed range start"))?;
    if end.is_empty() {
        return Ok(Some(format!("bytes={}-", start + resume)));
    }
    let end: u64 = end.parse().map_err(|_| invalid("malformed range end"))?;
    if start > end {
        return Err(invalid("inverted range"));
    }
    if start + resume > end {
        return Err(invalid("resumed past the end of the range"));
    }
    Ok(Some(format!("bytes={}-{}", start + resume, end)))
}

/// Filename advertised by `Content-Disposition`, when present.
fn disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(CONTENT_DISPOSITION)?.to_str().ok()?;
    let start = value.find("filename=")? + "filename=".len();
    let rest = &value[start..];
    let name = if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next()?
    } else {
        rest.split(';').next()?.trim()
    };
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Keeps display names short: rightmost 40 characters, `(…)` prefix.
fn truncate_display_name(name: &str) -> String {
    const KEEP: usize = 40;
    let count = name.chars().count();
    if count <= KEEP {
        return name.to_string();
    }
    let tail: String = name.chars().skip(count - KEEP).collect();
    format!("(…){tail}")
}
