//! Cross-process advisory file lock.
//!
//! The lock is weak: it serializes peer processes on the same host, and a
//! crash must never leave a permanent lock. The guard deletes the lock
//! file on release; a holder that died without releasing leaves a plain
//! file whose advisory lock the OS already dropped.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::debug;

/// RAII guard over an exclusive advisory lock on a path.
///
/// Acquiring creates the file if missing and blocks until the exclusive
/// lock is granted; dropping unlocks and removes the file.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Blocks until the exclusive lock on `path` is held.
    pub fn acquire(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        file.lock_exclusive()?;
        debug!(path = %path.display(), "acquired file lock");
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Async acquisition; the blocking wait runs on the blocking pool.
    pub async fn acquire_async(path: PathBuf) -> io::Result<Self> {
        tokio::task::spawn_blocking(move || Self::acquire(&path))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
        debug!(path = %self.path.display(), "released file lock");
    }
}

/// Runs `body` while holding the lock at `path`.
pub fn with_lock<T>(path: &Path, body: impl FnOnce() -> T) -> io::Result<T> {
    let _guard = FileLock::acquire(path)?;
    Ok(body())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_file_removed_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        {
            let guard = FileLock::acquire(&path).unwrap();
            assert!(path.exists());
            assert_eq!(guard.path(), path);
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_lock_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("x.lock");
        let _guard = FileLock::acquire(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_with_lock_runs_body_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        let value = with_lock(&path, || 42).unwrap();
        assert_eq!(value, 42);
        assert!(!path.exists());
    }

    #[test]
    fn test_lock_serializes_threads() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("serial.lock");
        let concurrent = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let path = path.clone();
                let concurrent = Arc::clone(&concurrent);
                let peak = Arc::clone(&peak);
                std::thread::spawn(move || {
                    let _guard = FileLock::acquire(&path).unwrap();
                    let now = concurrent.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(std::time::Duration::from_millis(5));
                    concurrent.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_acquisition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.lock");
        let guard = FileLock::acquire_async(path.clone()).await.unwrap();
        assert!(path.exists());
        drop(guard);
        assert!(!path.exists());
    }
}
