//! Client configuration and the environment variables that shape it.
//!
//! Environment values always win over caller-supplied ones for the two
//! timeout knobs; everything else is a default the caller may override on
//! the constructed [`HubConfig`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::paths::PathResolver;

/// Base URL of the Hub.
pub const ENV_ENDPOINT: &str = "HF_ENDPOINT";
/// Root of user state.
pub const ENV_HOME: &str = "HF_HOME";
/// Cache root for the content-addressed tree.
pub const ENV_HUB_CACHE: &str = "HF_HUB_CACHE";
/// Legacy alias of [`ENV_HUB_CACHE`].
pub const ENV_HUB_CACHE_LEGACY: &str = "HUGGINGFACE_HUB_CACHE";
/// Auth token value.
pub const ENV_TOKEN: &str = "HF_TOKEN";
/// Legacy alias of [`ENV_TOKEN`].
pub const ENV_TOKEN_LEGACY: &str = "HUGGING_FACE_HUB_TOKEN";
/// File holding the auth token.
pub const ENV_TOKEN_PATH: &str = "HF_TOKEN_PATH";
/// Silences the symlink-support warning.
pub const ENV_DISABLE_SYMLINKS_WARNING: &str = "HF_HUB_DISABLE_SYMLINKS_WARNING";
/// Never send the cached token implicitly.
pub const ENV_DISABLE_IMPLICIT_TOKEN: &str = "HF_HUB_DISABLE_IMPLICIT_TOKEN";
/// Enables the turbo (multi-connection) transport.
pub const ENV_ENABLE_HF_TRANSFER: &str = "HF_HUB_ENABLE_HF_TRANSFER";
/// Disables the xet transport.
pub const ENV_DISABLE_XET: &str = "HF_HUB_DISABLE_XET";
/// Metadata probe timeout, integer seconds.
pub const ENV_ETAG_TIMEOUT: &str = "HF_HUB_ETAG_TIMEOUT";
/// Per-chunk download timeout, integer seconds.
pub const ENV_DOWNLOAD_TIMEOUT: &str = "HF_HUB_DOWNLOAD_TIMEOUT";
/// Forces offline mode.
pub const ENV_OFFLINE: &str = "HF_HUB_OFFLINE";

/// Default Hub endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
/// Default metadata probe timeout.
pub const DEFAULT_ETAG_TIMEOUT: Duration = Duration::from_secs(10);
/// Default per-chunk download timeout.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);
/// Default snapshot parallelism.
pub const DEFAULT_MAX_WORKERS: usize = 8;

/// Resolved client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Base URL, trailing slashes stripped.
    pub endpoint: String,
    /// Cache root for the content-addressed tree.
    pub hub_cache: PathBuf,
    /// File holding the auth token.
    pub token_path: PathBuf,
    /// Force offline mode.
    pub offline: bool,
    /// Silence the symlink-support warning.
    pub disable_symlinks_warning: bool,
    /// Never send the cached token implicitly.
    pub disable_implicit_token: bool,
    /// Turbo transport enabled.
    pub enable_transfer: bool,
    /// Xet transport disabled.
    pub disable_xet: bool,
    /// Metadata probe timeout.
    pub etag_timeout: Duration,
    /// Per-chunk download timeout.
    pub download_timeout: Duration,
    /// True when [`HubConfig::etag_timeout`] came from the environment.
    pub etag_timeout_pinned: bool,
    /// True when [`HubConfig::download_timeout`] came from the environment.
    pub download_timeout_pinned: bool,
    /// Snapshot download parallelism.
    pub max_workers: usize,
    /// `User-Agent` sent on every request.
    pub user_agent: String,
}

impl Default for HubConfig {
    fn default() -> Self {
        let resolver = PathResolver;
        let state_root = resolver.default_state_root();
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            hub_cache: state_root.join("hub"),
            token_path: state_root.join("token"),
            offline: false,
            disable_symlinks_warning: false,
            disable_implicit_token: false,
            enable_transfer: false,
            disable_xet: false,
            etag_timeout: DEFAULT_ETAG_TIMEOUT,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            etag_timeout_pinned: false,
            download_timeout_pinned: false,
            max_workers: DEFAULT_MAX_WORKERS,
            user_agent: build_user_agent(None),
        }
    }
}

impl HubConfig {
    /// Builds a configuration from the recognized environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let resolver = PathResolver;

        let state_root = match std::env::var_os(ENV_HOME) {
            Some(home) => PathBuf::from(home),
            None => resolver.default_state_root(),
        };
        config.hub_cache = env_path(ENV_HUB_CACHE)
            .or_else(|| env_path(ENV_HUB_CACHE_LEGACY))
            .unwrap_or_else(|| state_root.join("hub"));
        config.token_path = env_path(ENV_TOKEN_PATH).unwrap_or_else(|| state_root.join("token"));

        if let Ok(endpoint) = std::env::var(ENV_ENDPOINT) {
            config.endpoint = endpoint.trim_end_matches('/').to_string();
        }

        config.offline = env_flag(ENV_OFFLINE);
        config.disable_symlinks_warning = env_flag(ENV_DISABLE_SYMLINKS_WARNING);
        config.disable_implicit_token = env_flag(ENV_DISABLE_IMPLICIT_TOKEN);
        config.enable_transfer = env_flag(ENV_ENABLE_HF_TRANSFER);
        config.disable_xet = env_flag(ENV_DISABLE_XET);

        if let Some(secs) = env_seconds(ENV_ETAG_TIMEOUT) {
            config.etag_timeout = secs;
            config.etag_timeout_pinned = true;
        }
        if let Some(secs) = env_seconds(ENV_DOWNLOAD_TIMEOUT) {
            config.download_timeout = secs;
            config.download_timeout_pinned = true;
        }

        config
    }

    /// Effective probe timeout: an environment-pinned value beats the
    /// caller-supplied override.
    pub fn effective_etag_timeout(&self, caller: Option<Duration>) -> Duration {
        if self.etag_timeout_pinned {
            self.etag_timeout
        } else {
            caller.unwrap_or(self.etag_timeout)
        }
    }

    /// Effective per-chunk timeout, same precedence rule.
    pub fn effective_download_timeout(&self, caller: Option<Duration>) -> Duration {
        if self.download_timeout_pinned {
            self.download_timeout
        } else {
            caller.unwrap_or(self.download_timeout)
        }
    }
}

/// Builds the `User-Agent` string: product, version, optional library tag.
pub fn build_user_agent(library_tag: Option<&str>) -> String {
    let base = format!("hubcache/{}; rust", env!("CARGO_PKG_VERSION"));
    match library_tag {
        Some(tag) if !tag.is_empty() => format!("{base}; {tag}"),
        _ => base,
    }
}

/// Case-insensitive boolean environment flag.
pub fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(value) => parse_flag(&value),
        Err(_) => false,
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_uppercase().as_str(),
        "1" | "ON" | "YES" | "TRUE"
    )
}

fn env_path(name: &str) -> Option<PathBuf> {
    std::env::var_os(name).map(PathBuf::from)
}

fn env_seconds(name: &str) -> Option<Duration> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring non-integer timeout");
            None
        }
    }
}
