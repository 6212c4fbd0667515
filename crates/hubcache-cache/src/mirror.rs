//! Local-directory mirror state.
//!
//! Each mirrored file carries a plaintext sidecar with three lines:
//! commit hash, etag, and a fractional seconds-since-epoch timestamp. A
//! sidecar only vouches for a file whose mtime has not moved past the
//! recorded timestamp (1 s tolerance); reads and writes serialize through
//! the sidecar's `.lock`.

use std::io::{self, Read};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tracing::debug;

use hubcache_core::Result;

use crate::layout::LocalDownloadPaths;
use crate::lock::FileLock;

/// Tolerance when comparing file mtime against the sidecar timestamp.
const MTIME_TOLERANCE_SECS: f64 = 1.0;

/// Parsed sidecar metadata for one mirrored file.
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarMetadata {
    /// Commit hash the file was fetched at.
    pub commit_hash: String,
    /// Etag of the file content.
    pub etag: String,
    /// Seconds since epoch when the sidecar was written.
    pub timestamp: f64,
}

/// Reads the sidecar for `paths`, holding its lock.
///
/// Returns `None` when the sidecar is missing, malformed, or stale
/// (the mirrored file was modified after the sidecar was written).
pub fn read_sidecar(paths: &LocalDownloadPaths) -> Result<Option<SidecarMetadata>> {
    let _guard = FileLock::acquire(&paths.lock_path)?;
    Ok(read_sidecar_unlocked(paths))
}

fn read_sidecar_unlocked(paths: &LocalDownloadPaths) -> Option<SidecarMetadata> {
    let contents = std::fs::read_to_string(&paths.metadata_path).ok()?;
    let mut lines = contents.lines();
    let commit_hash = lines.next()?.trim().to_string();
    let etag = lines.next()?.trim().to_string();
    let timestamp: f64 = lines.next()?.trim().parse().ok()?;
    if commit_hash.is_empty() || etag.is_empty() {
        return None;
    }

    if let Some(mtime) = file_mtime(&paths.file_path) {
        if mtime > timestamp + MTIME_TOLERANCE_SECS {
            debug!(
                file = %paths.file_path.display(),
                mtime,
                timestamp,
                "sidecar is stale; ignoring"
            );
            return None;
        }
    }

    Some(SidecarMetadata {
        commit_hash,
        etag,
        timestamp,
    })
}

/// Writes the sidecar for `paths`, holding its lock.
pub fn write_sidecar(paths: &LocalDownloadPaths, commit_hash: &str, etag: &str) -> Result<()> {
    let _guard = FileLock::acquire(&paths.lock_path)?;
    write_sidecar_unlocked(paths, commit_hash, etag)
}

fn write_sidecar_unlocked(
    paths: &LocalDownloadPaths,
    commit_hash: &str,
    etag: &str,
) -> Result<()> {
    if let Some(parent) = paths.metadata_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    std::fs::write(
        &paths.metadata_path,
        format!("{commit_hash}\n{etag}\n{timestamp}\n"),
    )?;
    Ok(())
}

/// File mtime as fractional seconds since epoch.
fn file_mtime(path: &Path) -> Option<f64> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs_f64())
}

/// Streaming SHA-256 of a file, hex-encoded.
///
/// Used to accept an already-present mirror file when the server etag is
/// a content hash.
pub fn sha256_of_file(path: &Path) -> io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}
