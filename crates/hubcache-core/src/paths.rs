//! Platform path resolution.
//!
//! One collaborator with one job: find the user's home for the current
//! platform so the default state root can be derived from it. Kept as a
//! struct so tests and embedders can substitute their own root.

use std::path::PathBuf;

/// Directory name of the product's user state under the cache root.
pub const PRODUCT_DIR: &str = "huggingface";

/// Resolves platform-specific base directories.
#[derive(Debug, Clone, Default)]
pub struct PathResolver;

impl PathResolver {
    /// Returns the current user's home directory, if discoverable.
    pub fn home_dir(&self) -> Option<PathBuf> {
        #[cfg(windows)]
        {
            std::env::var_os("USERPROFILE").map(PathBuf::from)
        }
        #[cfg(not(windows))]
        {
            std::env::var_os("HOME").map(PathBuf::from)
        }
    }

    /// Default root of user state: `<home>/.cache/huggingface`.
    ///
    /// Falls back to a relative `.cache/huggingface` when no home can be
    /// discovered, so cache paths stay well-formed in minimal environments.
    pub fn default_state_root(&self) -> PathBuf {
        match self.home_dir() {
            Some(home) => home.join(".cache").join(PRODUCT_DIR),
            None => PathBuf::from(".cache").join(PRODUCT_DIR),
        }
    }
}
