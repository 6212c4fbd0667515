//! HTTP plumbing for hubcache: session, backoff, response classification,
//! metadata probe, byte transport, accelerated-transport interfaces.
//!
//! Everything network-shaped lives here so the cache and client crates
//! stay free of protocol details. Errors are classified once, into the
//! shared taxonomy from `hubcache-core`, and propagate unchanged.

pub mod accel;
pub mod backoff;
pub mod classify;
pub mod download;
pub mod probe;
pub mod session;

pub use accel::{turbo_eligible, AcceleratedTransport, DownloadTarget, TURBO_SIZE_THRESHOLD};
pub use backoff::{execute, BackoffPolicy, RetryBody};
pub use classify::classify_response;
pub use download::{adjust_range, http_get, MAX_BASIC_DOWNLOAD_SIZE};
pub use probe::{fetch_metadata, link_header_target, FileMetadata, XetDescriptor};
pub use session::{is_tls_fault, is_transient_fault, HttpSession, SessionOptions};
