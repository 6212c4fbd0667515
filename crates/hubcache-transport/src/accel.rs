//! Accelerated transport interfaces.
//!
//! Two pluggable backends can take over the body transfer: the xet
//! content-defined-chunked downloader (selected when the metadata probe
//! returned a xet descriptor) and the turbo multi-connection downloader
//! (selected for large regular files). Both honor the same
//! size-consistency postcondition as the basic transport; their internals
//! live outside this crate.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use reqwest::header::{HeaderMap, RANGE};

use hubcache_core::Result;

use crate::probe::XetDescriptor;

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Minimum size for which the turbo transport is worth its setup cost.
pub const TURBO_SIZE_THRESHOLD: u64 = 5 * 1024 * 1024;

/// What an accelerated backend is asked to fetch.
#[derive(Debug, Clone)]
pub struct DownloadTarget {
    /// Resolved byte location (CDN or origin).
    pub url: String,
    /// Xet descriptor, present when the server offered that transport.
    pub xet: Option<XetDescriptor>,
}

/// A pluggable body transport.
///
/// Implementations must leave `sink_path` at exactly `expected_size`
/// bytes on success.
pub trait AcceleratedTransport: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Downloads the full body of `target` into `sink_path`.
    fn download<'a>(
        &'a self,
        target: &'a DownloadTarget,
        sink_path: &'a Path,
        headers: &'a HeaderMap,
        expected_size: u64,
    ) -> BoxFuture<'a, Result<()>>;
}

/// Whether the turbo transport should handle a transfer.
///
/// It parallelizes within one file, so it is gated on size, excluded when
/// proxies are configured, and excluded when the caller asked for a
/// specific byte range.
pub fn turbo_eligible(expected_size: u64, proxies_configured: bool, headers: &HeaderMap) -> bool {
    expected_size >= TURBO_SIZE_THRESHOLD
        && !proxies_configured
        && !headers.contains_key(RANGE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// In-memory transport for tests: writes `expected_size` zero bytes.
    pub struct MockTransport {
        pub calls: AtomicU64,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                calls: AtomicU64::new(0),
            }
        }
    }

    impl AcceleratedTransport for MockTransport {
        fn name(&self) -> &'static str {
            "mock"
        }

        fn download<'a>(
            &'a self,
            _target: &'a DownloadTarget,
            sink_path: &'a Path,
            _headers: &'a HeaderMap,
            expected_size: u64,
        ) -> BoxFuture<'a, Result<()>> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Box::pin(async move {
                tokio::fs::write(sink_path, vec![0u8; expected_size as usize]).await?;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn test_mock_transport_honors_size_postcondition() {
        let dir = tempfile::tempdir().unwrap();
        let sink = dir.path().join("blob.incomplete");
        let transport = MockTransport::new();
        let target = DownloadTarget {
            url: "https://hub/f".to_string(),
            xet: None,
        };
        transport
            .download(&target, &sink, &HeaderMap::new(), 128)
            .await
            .unwrap();
        assert_eq!(std::fs::metadata(&sink).unwrap().len(), 128);
        assert_eq!(transport.calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_turbo_eligibility() {
        let empty = HeaderMap::new();
        assert!(turbo_eligible(TURBO_SIZE_THRESHOLD, false, &empty));
        assert!(!turbo_eligible(TURBO_SIZE_THRESHOLD - 1, false, &empty));
        assert!(!turbo_eligible(TURBO_SIZE_THRESHOLD, true, &empty));

        let mut with_range = HeaderMap::new();
        with_range.insert(RANGE, "bytes=0-10".parse().unwrap());
        assert!(!turbo_eligible(TURBO_SIZE_THRESHOLD, false, &with_range));
    }
}
