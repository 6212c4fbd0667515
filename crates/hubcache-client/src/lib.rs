//! Hub client: cached single-file downloads and repository snapshots.
//!
//! The entry point is [`HubClient`]: it resolves configuration and
//! authentication once, then serves file downloads into a content-addressed
//! cache shared across processes, or mirrors snapshots into a directory of
//! the caller's choosing.
//!
//! ```rust,no_run
//! # async fn example() -> hubcache_core::Result<()> {
//! use hubcache_client::{DownloadRequest, HubClient};
//! use hubcache_core::RepoId;
//!
//! let client = HubClient::from_env()?;
//! let path = client
//!     .download_file(&DownloadRequest::new(
//!         RepoId::model("meta-llama/Llama-3.2-1B"),
//!         "config.json",
//!     ))
//!     .await?;
//! tracing::info!(path = %path.display(), "cached");
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod file;
pub mod snapshot;

pub use api::{
    DatasetInfo, LfsInfo, ModelInfo, RepoInfo, Sibling, SpaceInfo, TreeEntry, TreePager,
};
pub use client::HubClient;
pub use file::DownloadRequest;
pub use snapshot::{SnapshotFilter, SnapshotRequest};

pub use hubcache_cache::CacheLookup;
pub use hubcache_core::{HubConfig, HubError, RepoId, RepoKind, Result, TokenPolicy};
