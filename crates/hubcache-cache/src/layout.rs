//! Cache and local-mirror path computation.
//!
//! Server filenames always use `/` separators; they are split and
//! re-joined with the host separator here, and nothing computed in this
//! module may escape its storage root.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha1::{Digest, Sha1};

use hubcache_core::paths::PRODUCT_DIR;
use hubcache_core::{HubError, Result};

/// Directory holding sidecar metadata inside a local mirror.
pub const MIRROR_STATE_DIR: &str = "download";

/// Pointer path `storage/snapshots/<commit>/<relative>`.
///
/// Rejects filenames whose normalized form is not strictly inside
/// `storage/snapshots/`.
pub fn pointer_path(storage: &Path, commit: &str, relative: &str) -> Result<PathBuf> {
    let snapshots = storage.join("snapshots");
    let mut path = snapshots.join(commit);
    for part in split_server_path(relative)? {
        path.push(part);
    }
    if !path.starts_with(&snapshots) || !is_single_component(commit) {
        return Err(HubError::InvalidPath {
            path: format!("{commit}/{relative}"),
            reason: "escapes the snapshots directory".to_string(),
        });
    }
    Ok(extend_long_path(path))
}

/// No-exist marker path `storage/.no_exist/<commit>/<relative>`.
pub fn no_exist_path(storage: &Path, commit: &str, relative: &str) -> Result<PathBuf> {
    let root = storage.join(".no_exist");
    let mut path = root.join(commit);
    for part in split_server_path(relative)? {
        path.push(part);
    }
    if !path.starts_with(&root) || !is_single_component(commit) {
        return Err(HubError::InvalidPath {
            path: format!("{commit}/{relative}"),
            reason: "escapes the no-exist directory".to_string(),
        });
    }
    Ok(extend_long_path(path))
}

/// Paths used when downloading one file into a local mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDownloadPaths {
    /// Final destination of the file.
    pub file_path: PathBuf,
    /// Lock file serializing sidecar reads and writes.
    pub lock_path: PathBuf,
    /// Sidecar metadata file.
    pub metadata_path: PathBuf,
}

impl LocalDownloadPaths {
    /// Incomplete-transfer path for a given etag.
    ///
    /// The name embeds a short hash of the metadata filename and the etag,
    /// so concurrent partial downloads of the same filename under
    /// different etags never collide.
    pub fn incomplete_path(&self, etag: &str) -> PathBuf {
        let basename = self
            .metadata_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let digest = Sha1::digest(basename.as_bytes());
        let short_hash = URL_SAFE_NO_PAD.encode(digest);
        self.metadata_path
            .with_file_name(format!("{short_hash}.{etag}.incomplete"))
    }
}

/// Computes the mirror paths for `filename` under `local_dir`.
///
/// Sidecars live under `<local_dir>/.cache/huggingface/download/`,
/// mirroring the relative filename.
pub fn local_download_paths(local_dir: &Path, filename: &str) -> Result<LocalDownloadPaths> {
    let parts = split_server_path(filename)?;

    let mut file_path = local_dir.to_path_buf();
    for part in &parts {
        file_path.push(part);
    }
    if !file_path.starts_with(local_dir) {
        return Err(HubError::InvalidPath {
            path: filename.to_string(),
            reason: "escapes the local directory".to_string(),
        });
    }

    let state_dir = local_dir.join(".cache").join(PRODUCT_DIR).join(MIRROR_STATE_DIR);
    let mut metadata_path = state_dir.clone();
    for part in &parts {
        metadata_path.push(part);
    }
    let basename = metadata_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lock_path = metadata_path.with_file_name(format!("{basename}.lock"));
    metadata_path.set_file_name(format!("{basename}.metadata"));

    Ok(LocalDownloadPaths {
        file_path: extend_long_path(file_path),
        lock_path: extend_long_path(lock_path),
        metadata_path: extend_long_path(metadata_path),
    })
}

/// Writes the one-line `.gitignore` (`*`) next to the sidecars, once.
pub fn ensure_mirror_gitignore(local_dir: &Path) -> std::io::Result<()> {
    let state_dir = local_dir.join(".cache").join(PRODUCT_DIR).join(MIRROR_STATE_DIR);
    std::fs::create_dir_all(&state_dir)?;
    let gitignore = state_dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, "*")?;
    }
    Ok(())
}

/// Splits a server filename on `/`, rejecting traversal.
///
/// Backslashes are rejected outright: the server never produces them, and
/// on the platform where they separate paths a `..` could hide behind one.
fn split_server_path(filename: &str) -> Result<Vec<String>> {
    if filename.is_empty() {
        return Err(HubError::InvalidPath {
            path: filename.to_string(),
            reason: "empty filename".to_string(),
        });
    }
    if filename.contains('\\') {
        return Err(HubError::InvalidPath {
            path: filename.to_string(),
            reason: "backslash in server filename".to_string(),
        });
    }
    let mut parts = Vec::new();
    for part in filename.split('/') {
        match part {
            "" | "." => continue,
            ".." => {
                return Err(HubError::InvalidPath {
                    path: filename.to_string(),
                    reason: "parent traversal in filename".to_string(),
                })
            }
            part => parts.push(part.to_string()),
        }
    }
    if parts.is_empty() {
        return Err(HubError::InvalidPath {
            path: filename.to_string(),
            reason: "filename has no components".to_string(),
        });
    }
    Ok(parts)
}

fn is_single_component(commit: &str) -> bool {
    !commit.is_empty() && !commit.contains('/') && !commit.contains('\\') && commit != ".."
}

/// Prefixes absolute paths longer than 255 characters with the
/// extended-path marker on the platform with a 260-character limit.
#[cfg(windows)]
fn extend_long_path(path: PathBuf) -> PathBuf {
    let rendered = path.to_string_lossy();
    if path.is_absolute() && rendered.len() > 255 && !rendered.starts_with("\\\\?\\") {
        PathBuf::from(format!("\\\\?\\{rendered}"))
    } else {
        path
    }
}

#[cfg(not(windows))]
fn extend_long_path(path: PathBuf) -> PathBuf {
    path
}
