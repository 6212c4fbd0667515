#![warn(missing_docs)]

//! hubcache shared types: error taxonomy, repository identity, configuration
//!
//! This crate carries everything the transport, cache, and client crates
//! agree on: the [`HubError`] taxonomy (server failures classified once and
//! propagated unchanged), repository identity and URL templates, the
//! environment-driven [`HubConfig`], and token resolution.

pub mod config;
pub mod error;
pub mod paths;
pub mod repo;
pub mod token;

pub use config::{build_user_agent, env_flag, HubConfig};
pub use error::{HubError, HubHttpError, Result};
pub use paths::PathResolver;
pub use repo::{
    is_commit_hash, is_sha256_etag, normalize_etag, RepoId, RepoKind, DEFAULT_REVISION,
    REPO_ID_SEPARATOR,
};
pub use token::{cached_token, TokenPolicy};
