//! Single-file download coordinator.
//!
//! Produces a stable local path for one `(repo, revision, filename)`
//! tuple: short-circuits on cache hits, probes metadata, downloads under
//! the blob lock, and falls back to cached state when the probe cannot
//! reach the server. HEAD failures are captured rather than raised; only
//! authentic server NACKs propagate through the offline fallback.

use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::header::{HeaderMap, AUTHORIZATION};
use tracing::{debug, info, warn};

use hubcache_cache::{
    ensure_mirror_gitignore, local_download_paths, read_sidecar, sha256_of_file, write_sidecar,
    CacheLookup, FileLock, RepoCache,
};
use hubcache_core::{
    is_commit_hash, is_sha256_etag, HubError, HubHttpError, RepoId, Result, DEFAULT_REVISION,
};
use hubcache_transport::{
    fetch_metadata, http_get, turbo_eligible, DownloadTarget, FileMetadata,
};

use crate::client::HubClient;

/// Options for one file download.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Repository the file belongs to.
    pub repo: RepoId,
    /// Server-side filename (`/`-separated).
    pub filename: String,
    /// Commit hash or symbolic revision; defaults to `main`.
    pub revision: Option<String>,
    /// Re-download even when cached.
    pub force_download: bool,
    /// Never touch the network.
    pub local_files_only: bool,
    /// Mirror into this directory instead of the cache tree.
    pub local_dir: Option<PathBuf>,
    /// Caller override for the metadata probe timeout.
    pub etag_timeout: Option<Duration>,
}

impl DownloadRequest {
    /// A request for `filename` in `repo` at the default revision.
    pub fn new(repo: RepoId, filename: impl Into<String>) -> Self {
        Self {
            repo,
            filename: filename.into(),
            revision: None,
            force_download: false,
            local_files_only: false,
            local_dir: None,
            etag_timeout: None,
        }
    }

    /// Pins the revision.
    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Forces a fresh download.
    pub fn force_download(mut self, force: bool) -> Self {
        self.force_download = force;
        self
    }

    /// Restricts the request to local state.
    pub fn local_files_only(mut self, local_only: bool) -> Self {
        self.local_files_only = local_only;
        self
    }

    /// Mirrors the file into `dir` instead of the cache tree.
    pub fn local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = Some(dir.into());
        self
    }
}

impl HubClient {
    /// Downloads one file, returning a stable local path whose content
    /// matches the server's canonical version.
    pub async fn download_file(&self, request: &DownloadRequest) -> Result<PathBuf> {
        if request.force_download && request.local_files_only {
            return Err(HubError::InvalidArgument(
                "force_download and local_files_only are contradictory".to_string(),
            ));
        }

        let revision = request
            .revision
            .clone()
            .unwrap_or_else(|| DEFAULT_REVISION.to_string());

        if let Some(local_dir) = request.local_dir.clone() {
            return self.download_to_local_dir(request, &revision, &local_dir).await;
        }
        self.download_to_cache(request, &revision).await
    }

    /// Probes metadata and checks whether the file exists server-side.
    pub async fn file_exists(
        &self,
        repo: &RepoId,
        filename: &str,
        revision: Option<&str>,
    ) -> Result<bool> {
        let revision = revision.unwrap_or(DEFAULT_REVISION);
        let url = repo.resolve_url(&self.config().endpoint, revision, filename);
        let headers = self.request_headers(true);
        let timeout = self.config().effective_etag_timeout(None);
        match fetch_metadata(self.session(), &url, &headers, timeout).await {
            Ok(_) => Ok(true),
            Err(
                HubError::EntryNotFound(_)
                | HubError::RepositoryNotFound(_)
                | HubError::RevisionNotFound(_),
            ) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn download_to_cache(
        &self,
        request: &DownloadRequest,
        revision: &str,
    ) -> Result<PathBuf> {
        let cache = RepoCache::new(&self.config().hub_cache, &request.repo);
        let local_only = request.local_files_only || self.config().offline;

        // A hash revision with a materialized pointer needs no HTTP at all.
        if is_commit_hash(revision) && !request.force_download {
            if let CacheLookup::Found(path) = cache.try_load(revision, &request.filename)? {
                return Ok(path);
            }
        }

        if local_only {
            return self.resolve_offline(&cache, revision, &request.filename, true, None);
        }

        let url = request
            .repo
            .resolve_url(&self.config().endpoint, revision, &request.filename);
        let headers = self.request_headers(true);
        let timeout = self.config().effective_etag_timeout(request.etag_timeout);

        match fetch_metadata(self.session(), &url, &headers, timeout).await {
            Ok(meta) => {
                self.fetch_into_cache(&cache, request, revision, &url, &headers, &meta)
                    .await
            }
            Err(error) => {
                self.handle_probe_failure(&cache, request, revision, error)
            }
        }
    }

    /// Probe failed: cache absences, propagate NACKs, otherwise try to
    /// satisfy the request from local state.
    fn handle_probe_failure(
        &self,
        cache: &RepoCache,
        request: &DownloadRequest,
        revision: &str,
        error: HubError,
    ) -> Result<PathBuf> {
        if let HubError::EntryNotFound(ctx) = &error {
            if let Some(commit) = ctx.commit_hash.clone() {
                // The server confirmed absence at a concrete commit:
                // record it so offline lookups stop asking.
                if let Err(marker_error) = cache.mark_no_exist(&commit, &request.filename) {
                    warn!(error = %marker_error, "could not write no-exist marker");
                }
                let _ = cache.update_ref(revision, &commit);
            }
            return Err(error);
        }
        if error.is_authoritative_nack() {
            return Err(error);
        }

        debug!(error = %error, "metadata probe failed; attempting offline fallback");
        self.resolve_offline(
            cache,
            revision,
            &request.filename,
            !request.force_download,
            Some(error),
        )
    }

    /// Offline satisfaction: hash revisions resolve directly, symbolic
    /// ones through `refs/`; a materialized pointer wins, a no-exist
    /// marker reports cached absence.
    fn resolve_offline(
        &self,
        cache: &RepoCache,
        revision: &str,
        filename: &str,
        allow_cached: bool,
        probe_error: Option<HubError>,
    ) -> Result<PathBuf> {
        if allow_cached {
            match cache.try_load(revision, filename)? {
                CacheLookup::Found(path) => {
                    if probe_error.is_some() {
                        warn!(
                            path = %path.display(),
                            "server unreachable; returning cached file"
                        );
                    }
                    return Ok(path);
                }
                CacheLookup::CachedAbsent => {
                    return Err(HubError::EntryNotFound(
                        HubHttpError::new(
                            String::new(),
                            format!("{filename} does not exist at {revision} (cached absence)"),
                        )
                        .finalize(),
                    ));
                }
                CacheLookup::Miss => {}
            }
        }

        match probe_error {
            Some(error) => Err(HubError::LocalEntryNotFound(format!(
                "{filename} is not cached and the metadata probe failed \
                 (check your internet connection): {error}"
            ))),
            None if self.config().offline => Err(HubError::OfflineModeEnabled(format!(
                "{filename} is not cached and offline mode is enabled"
            ))),
            None => Err(HubError::LocalEntryNotFound(format!(
                "{filename} is not cached and local_files_only is set"
            ))),
        }
    }

    /// Materializes `(commit, filename)` in the cache tree from probed
    /// metadata, downloading the blob if needed.
    async fn fetch_into_cache(
        &self,
        cache: &RepoCache,
        request: &DownloadRequest,
        revision: &str,
        url: &str,
        headers: &HeaderMap,
        meta: &FileMetadata,
    ) -> Result<PathBuf> {
        let pointer = cache.pointer_path(&meta.commit_hash, &request.filename)?;

        if !request.force_download && pointer.exists() {
            cache.update_ref(revision, &meta.commit_hash)?;
            return Ok(pointer);
        }

        // One lock per (repo, etag): a single worker performs the GET,
        // the rest block here and observe the finished blob.
        let _lock = FileLock::acquire_async(cache.blob_lock_path(&meta.etag)).await?;

        if !request.force_download && pointer.exists() {
            cache.update_ref(revision, &meta.commit_hash)?;
            return Ok(pointer);
        }

        let blob = cache.blob_path(&meta.etag);
        let warn_symlinks = !self.config().disable_symlinks_warning;

        if blob.exists() && !request.force_download {
            debug!(etag = %meta.etag, "blob hit; materializing pointer");
            cache.materialize_pointer(&blob, &pointer, false, warn_symlinks)?;
        } else {
            let incomplete = cache.incomplete_blob_path(&meta.etag);
            if let Some(parent) = incomplete.parent() {
                std::fs::create_dir_all(parent)?;
            }
            self.transfer(request, url, headers, meta, &incomplete).await?;
            std::fs::rename(&incomplete, &blob)?;
            if let Err(error) = cache.normalize_permissions(&blob) {
                warn!(error = %error, "could not normalize blob permissions");
            }
            cache.materialize_pointer(&blob, &pointer, true, warn_symlinks)?;
            info!(path = %pointer.display(), etag = %meta.etag, "file cached");
        }

        cache.update_ref(revision, &meta.commit_hash)?;
        Ok(pointer)
    }

    /// Runs the body transfer into `sink`, picking xet, turbo, or the
    /// basic transport, and verifying the advertised size.
    async fn transfer(
        &self,
        request: &DownloadRequest,
        url: &str,
        headers: &HeaderMap,
        meta: &FileMetadata,
        sink: &Path,
    ) -> Result<()> {
        // Bytes may live on an unauthenticated CDN: never replay the
        // authorization header across hosts.
        let mut transfer_headers = headers.clone();
        if meta.is_cross_host(url) {
            transfer_headers.remove(AUTHORIZATION);
        }

        let use_xet = meta.xet.is_some()
            && !self.config().disable_xet
            && self.xet_transport().is_some();
        let use_turbo = !use_xet
            && self.config().enable_transfer
            && self.turbo_transport().is_some()
            && turbo_eligible(
                meta.size,
                self.session().proxies_configured(),
                &transfer_headers,
            );

        // Accelerated transports manage their own layout; a stale partial
        // file from the basic transport would corrupt them.
        if request.force_download || use_xet || use_turbo {
            if sink.exists() {
                std::fs::remove_file(sink)?;
            }
        }

        if use_xet || use_turbo {
            let transport = if use_xet {
                self.xet_transport().expect("checked above")
            } else {
                self.turbo_transport().expect("checked above")
            };
            let target = DownloadTarget {
                url: meta.location.clone(),
                xet: meta.xet.clone(),
            };
            debug!(transport = transport.name(), size = meta.size, "accelerated transfer");
            transport
                .download(&target, sink, &transfer_headers, meta.size)
                .await?;
            let actual = std::fs::metadata(sink).map(|m| m.len()).unwrap_or(0);
            if actual != meta.size {
                return Err(HubError::Consistency {
                    path: sink.display().to_string(),
                    expected: meta.size,
                    actual,
                });
            }
            return Ok(());
        }

        let resume_size = std::fs::metadata(sink).map(|m| m.len()).unwrap_or(0);
        let chunk_timeout = self.config().effective_download_timeout(None);
        http_get(
            self.session(),
            &meta.location,
            sink,
            &transfer_headers,
            resume_size,
            Some(meta.size),
            Some(&request.filename),
            chunk_timeout,
        )
        .await
    }

    /// Local-directory mirror flow, with per-file sidecar freshness.
    async fn download_to_local_dir(
        &self,
        request: &DownloadRequest,
        revision: &str,
        local_dir: &Path,
    ) -> Result<PathBuf> {
        let paths = local_download_paths(local_dir, &request.filename)?;
        ensure_mirror_gitignore(local_dir)?;
        let local_only = request.local_files_only || self.config().offline;

        let sidecar = read_sidecar(&paths)?;

        // Step 1: a sidecar pinned to the requested commit vouches for
        // the file without any network.
        if !request.force_download {
            if let Some(sidecar) = &sidecar {
                if is_commit_hash(revision)
                    && sidecar.commit_hash == revision
                    && paths.file_path.exists()
                {
                    return Ok(paths.file_path);
                }
            }
        }

        if local_only {
            if !request.force_download && paths.file_path.exists() {
                return Ok(paths.file_path);
            }
            return Err(if self.config().offline {
                HubError::OfflineModeEnabled(format!(
                    "{} is not mirrored and offline mode is enabled",
                    request.filename
                ))
            } else {
                HubError::LocalEntryNotFound(format!(
                    "{} is not mirrored and local_files_only is set",
                    request.filename
                ))
            });
        }

        let url = request
            .repo
            .resolve_url(&self.config().endpoint, revision, &request.filename);
        let headers = self.request_headers(true);
        let timeout = self.config().effective_etag_timeout(request.etag_timeout);

        let meta = match fetch_metadata(self.session(), &url, &headers, timeout).await {
            Ok(meta) => meta,
            Err(error) => {
                if error.is_authoritative_nack() || matches!(error, HubError::EntryNotFound(_)) {
                    return Err(error);
                }
                if !request.force_download && paths.file_path.exists() {
                    warn!(
                        path = %paths.file_path.display(),
                        "server unreachable; returning mirrored file"
                    );
                    return Ok(paths.file_path);
                }
                return Err(HubError::LocalEntryNotFound(format!(
                    "{} is not mirrored and the metadata probe failed \
                     (check your internet connection): {error}",
                    request.filename
                )));
            }
        };

        if !request.force_download {
            // Step 2: same etag as the sidecar, file present: refresh the
            // sidecar's commit and keep the bytes.
            if let Some(sidecar) = &sidecar {
                if sidecar.etag == meta.etag && paths.file_path.exists() {
                    write_sidecar(&paths, &meta.commit_hash, &meta.etag)?;
                    return Ok(paths.file_path);
                }
            }

            // Step 3: no sidecar (or a sidecar with a different etag) but
            // the file is present and the etag is a content hash: accept
            // the file by hashing it.
            if paths.file_path.exists() && is_sha256_etag(&meta.etag) {
                let file_path = paths.file_path.clone();
                let digest = tokio::task::spawn_blocking(move || sha256_of_file(&file_path))
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))??;
                if digest == meta.etag {
                    debug!(path = %paths.file_path.display(), "local file matches etag hash");
                    write_sidecar(&paths, &meta.commit_hash, &meta.etag)?;
                    return Ok(paths.file_path);
                }
            }

            // Step 4: the content-addressed cache already holds the blob;
            // a local copy beats a re-download.
            let cache = RepoCache::new(&self.config().hub_cache, &request.repo);
            let blob = cache.blob_path(&meta.etag);
            if blob.exists() {
                debug!(etag = %meta.etag, "copying blob from cache into mirror");
                if let Some(parent) = paths.file_path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::copy(&blob, &paths.file_path)?;
                write_sidecar(&paths, &meta.commit_hash, &meta.etag)?;
                return Ok(paths.file_path);
            }
        }

        // Step 5: download through an incomplete path beside the sidecar,
        // then rename into place.
        if paths.file_path.exists() {
            std::fs::remove_file(&paths.file_path)?;
        }
        let incomplete = paths.incomplete_path(&meta.etag);
        if let Some(parent) = incomplete.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.transfer(request, &url, &headers, &meta, &incomplete).await?;
        if let Some(parent) = paths.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&incomplete, &paths.file_path)?;
        write_sidecar(&paths, &meta.commit_hash, &meta.etag)?;
        info!(path = %paths.file_path.display(), "file mirrored");
        Ok(paths.file_path)
    }
}
