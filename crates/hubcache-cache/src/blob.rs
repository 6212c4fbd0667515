//! Content-addressed blob store for one repository folder.
//!
//! Blobs are write-once: a transfer lands in `blobs/<etag>.incomplete`
//! and is renamed to `blobs/<etag>` only after size verification, so a
//! blob visible at full size is never rewritten. Pointers under
//! `snapshots/<commit>/` are symlinks into `blobs/` when the volume
//! supports them, otherwise moved or copied files.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing::{debug, warn};

use hubcache_core::{is_commit_hash, RepoId, Result};

use crate::layout;

/// Result of a pure-cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// The pointer exists; the path resolves to the blob content.
    Found(PathBuf),
    /// The server previously confirmed this path absent at this commit.
    CachedAbsent,
    /// Nothing cached.
    Miss,
}

/// Disk state for one repository inside a cache root.
#[derive(Debug, Clone)]
pub struct RepoCache {
    cache_root: PathBuf,
    repo_root: PathBuf,
    folder_name: String,
}

impl RepoCache {
    /// Binds a repository to a cache root. Nothing is created on disk.
    pub fn new(cache_root: &Path, repo: &RepoId) -> Self {
        let folder_name = repo.folder_name();
        Self {
            cache_root: cache_root.to_path_buf(),
            repo_root: cache_root.join(&folder_name),
            folder_name,
        }
    }

    /// Root folder of this repository inside the cache.
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Path of the blob for an etag.
    pub fn blob_path(&self, etag: &str) -> PathBuf {
        self.repo_root.join("blobs").join(etag)
    }

    /// Path of the in-progress transfer for an etag.
    pub fn incomplete_blob_path(&self, etag: &str) -> PathBuf {
        self.repo_root.join("blobs").join(format!("{etag}.incomplete"))
    }

    /// Lock file guarding the blob for an etag.
    ///
    /// Lives under `.locks/` beside the repo folders, so lock creation
    /// never touches the content-addressed directory itself.
    pub fn blob_lock_path(&self, etag: &str) -> PathBuf {
        self.cache_root
            .join(".locks")
            .join(&self.folder_name)
            .join(format!("{etag}.lock"))
    }

    /// Pointer path for `(commit, relative)`, validated.
    pub fn pointer_path(&self, commit: &str, relative: &str) -> Result<PathBuf> {
        layout::pointer_path(&self.repo_root, commit, relative)
    }

    /// Snapshot folder for a commit.
    pub fn snapshot_path(&self, commit: &str) -> PathBuf {
        self.repo_root.join("snapshots").join(commit)
    }

    /// Reads `refs/<revision>`, returning the stored commit hash.
    pub fn read_ref(&self, revision: &str) -> Option<String> {
        let contents = std::fs::read_to_string(self.ref_path(revision)).ok()?;
        let commit = contents.trim().to_string();
        if commit.is_empty() {
            None
        } else {
            Some(commit)
        }
    }

    /// Resolves a revision to a commit hash using only local state.
    pub fn resolve_revision(&self, revision: &str) -> Option<String> {
        if is_commit_hash(revision) {
            Some(revision.to_string())
        } else {
            self.read_ref(revision)
        }
    }

    /// Writes `refs/<revision>` when the stored value differs.
    ///
    /// Skipping the no-op write keeps read-only caches usable.
    pub fn update_ref(&self, revision: &str, commit: &str) -> io::Result<()> {
        if revision == commit {
            return Ok(());
        }
        if self.read_ref(revision).as_deref() == Some(commit) {
            return Ok(());
        }
        let path = self.ref_path(revision);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        debug!(revision, commit, "updating ref");
        std::fs::write(&path, commit)
    }

    fn ref_path(&self, revision: &str) -> PathBuf {
        let mut path = self.repo_root.join("refs");
        for part in revision.split('/') {
            path.push(part);
        }
        path
    }

    /// Records that the server confirmed `(commit, relative)` absent.
    pub fn mark_no_exist(&self, commit: &str, relative: &str) -> Result<()> {
        let path = layout::no_exist_path(&self.repo_root, commit, relative)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, b"")?;
        Ok(())
    }

    /// True when a no-exist marker is present for `(commit, relative)`.
    pub fn has_no_exist(&self, commit: &str, relative: &str) -> bool {
        layout::no_exist_path(&self.repo_root, commit, relative)
            .map(|path| path.exists())
            .unwrap_or(false)
    }

    /// Pure-cache lookup for `(revision, relative)`: no network, ever.
    pub fn try_load(&self, revision: &str, relative: &str) -> Result<CacheLookup> {
        let Some(commit) = self.resolve_revision(revision) else {
            return Ok(CacheLookup::Miss);
        };
        if self.has_no_exist(&commit, relative) {
            return Ok(CacheLookup::CachedAbsent);
        }
        let pointer = self.pointer_path(&commit, relative)?;
        if pointer.exists() {
            Ok(CacheLookup::Found(pointer))
        } else {
            Ok(CacheLookup::Miss)
        }
    }

    /// Materializes the pointer at `pointer` for `blob`.
    ///
    /// Cascade: symlink when the volume supports it; otherwise move the
    /// blob when it was freshly downloaded, else copy it. Any pre-existing
    /// file at the pointer is deleted first.
    pub fn materialize_pointer(
        &self,
        blob: &Path,
        pointer: &Path,
        new_blob: bool,
        warn_on_no_symlinks: bool,
    ) -> io::Result<()> {
        if let Some(parent) = pointer.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if pointer.exists() || std::fs::symlink_metadata(pointer).is_ok() {
            std::fs::remove_file(pointer)?;
        }

        if symlinks_supported(&self.cache_root, warn_on_no_symlinks) {
            let target = relative_path(pointer.parent().unwrap_or(Path::new("")), blob);
            match create_symlink(&target, pointer) {
                Ok(()) => {
                    debug!(pointer = %pointer.display(), target = %target.display(), "created pointer symlink");
                    return Ok(());
                }
                Err(error) => {
                    warn!(error = %error, "symlink failed despite probe; falling back to copy");
                }
            }
        }

        if new_blob {
            debug!(pointer = %pointer.display(), "moving fresh blob into pointer");
            std::fs::rename(blob, pointer)
        } else {
            debug!(pointer = %pointer.display(), "copying blob into pointer");
            std::fs::copy(blob, pointer).map(|_| ())
        }
    }

    /// Aligns a blob's mode with the directory's default file mode.
    ///
    /// The default is discovered from a throwaway temporary file because
    /// the process umask cannot be read without racing other threads.
    #[cfg(unix)]
    pub fn normalize_permissions(&self, path: &Path) -> io::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        std::fs::create_dir_all(&self.repo_root)?;
        let probe = tempfile::NamedTempFile::new_in(&self.repo_root)?;
        let mode = probe.as_file().metadata()?.permissions().mode();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
    }

    /// No-op on platforms without POSIX modes.
    #[cfg(not(unix))]
    pub fn normalize_permissions(&self, _path: &Path) -> io::Result<()> {
        Ok(())
    }
}

/// Whether symlinks work inside `cache_root`, probed once per cache root
/// per process.
pub fn symlinks_supported(cache_root: &Path, warn_on_unsupported: bool) -> bool {
    static PROBED: OnceLock<Mutex<HashMap<PathBuf, bool>>> = OnceLock::new();
    let probed = PROBED.get_or_init(|| Mutex::new(HashMap::new()));
    let mut probed = probed.lock().expect("symlink probe lock poisoned");
    if let Some(&supported) = probed.get(cache_root) {
        return supported;
    }

    let supported = probe_symlink(cache_root);
    if !supported && warn_on_unsupported {
        warn!(
            cache = %cache_root.display(),
            "filesystem does not support symlinks; falling back to copies, \
             which disables cross-revision deduplication"
        );
    }
    probed.insert(cache_root.to_path_buf(), supported);
    supported
}

fn probe_symlink(cache_root: &Path) -> bool {
    if std::fs::create_dir_all(cache_root).is_err() {
        return false;
    }
    let Ok(dir) = tempfile::tempdir_in(cache_root) else {
        return false;
    };
    let target = dir.path().join("probe");
    let link = dir.path().join("probe_link");
    if std::fs::write(&target, b"").is_err() {
        return false;
    }
    create_symlink(Path::new("probe"), &link).is_ok() && link.exists()
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

/// Lexical relative path from `from_dir` to `to`.
fn relative_path(from_dir: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from_dir.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let mut out = PathBuf::new();
    for _ in common..from.len() {
        out.push("..");
    }
    for component in &to[common..] {
        out.push(component);
    }
    out
}
