//! Repository snapshot coordinator.
//!
//! Lists the repository, filters siblings through shell-style allow and
//! ignore globs, and drives the single-file coordinator under bounded
//! parallelism. Every per-file call is pinned to the server-resolved
//! commit so no worker re-probes the revision on its own.

use std::path::PathBuf;
use std::sync::Arc;

use globset::{GlobBuilder, GlobMatcher};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use hubcache_cache::RepoCache;
use hubcache_core::{HubError, RepoId, Result, DEFAULT_REVISION};

use crate::api::TreeEntry;
use crate::client::HubClient;
use crate::file::DownloadRequest;

/// Sibling counts at or above this are assumed truncated; the file list
/// is re-fetched through the recursive tree API instead.
const SIBLING_TRUNCATION_THRESHOLD: usize = 50_000;

/// Options for one snapshot download.
#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    /// Repository to snapshot.
    pub repo: RepoId,
    /// Commit hash or symbolic revision; defaults to `main`.
    pub revision: Option<String>,
    /// Shell-style patterns a path must match (any); empty allows all.
    pub allow_patterns: Vec<String>,
    /// Shell-style patterns a path must not match (none).
    pub ignore_patterns: Vec<String>,
    /// Mirror into this directory instead of the cache tree.
    pub local_dir: Option<PathBuf>,
    /// Parallelism override; defaults to the configured `max_workers`.
    pub max_workers: Option<usize>,
    /// Re-download even when cached.
    pub force_download: bool,
    /// Never touch the network.
    pub local_files_only: bool,
}

impl SnapshotRequest {
    /// A snapshot request at the default revision with no filters.
    pub fn new(repo: RepoId) -> Self {
        Self {
            repo,
            revision: None,
            allow_patterns: Vec::new(),
            ignore_patterns: Vec::new(),
            local_dir: None,
            max_workers: None,
            force_download: false,
            local_files_only: false,
        }
    }

    /// Pins the revision.
    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Sets the allow patterns.
    pub fn allow_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allow_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the ignore patterns.
    pub fn ignore_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Mirrors the snapshot into `dir` instead of the cache tree.
    pub fn local_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.local_dir = Some(dir.into());
        self
    }
}

/// Compiled allow/ignore filter over repository paths.
#[derive(Debug)]
pub struct SnapshotFilter {
    allow: Vec<GlobMatcher>,
    ignore: Vec<GlobMatcher>,
}

impl SnapshotFilter {
    /// Compiles shell-style patterns; a pattern ending in `/` is
    /// expanded with a trailing wildcard.
    pub fn compile(allow: &[String], ignore: &[String]) -> Result<Self> {
        Ok(Self {
            allow: compile_patterns(allow)?,
            ignore: compile_patterns(ignore)?,
        })
    }

    /// A path passes when any allow pattern matches it (or no allow list
    /// was given) and no ignore pattern matches it.
    pub fn matches(&self, path: &str) -> bool {
        let allowed =
            self.allow.is_empty() || self.allow.iter().any(|glob| glob.is_match(path));
        allowed && !self.ignore.iter().any(|glob| glob.is_match(path))
    }
}

fn compile_patterns(patterns: &[String]) -> Result<Vec<GlobMatcher>> {
    patterns
        .iter()
        .map(|pattern| {
            let expanded = if pattern.ends_with('/') {
                format!("{pattern}*")
            } else {
                pattern.clone()
            };
            GlobBuilder::new(&expanded)
                .literal_separator(false)
                .build()
                .map(|glob| glob.compile_matcher())
                .map_err(|error| {
                    HubError::InvalidArgument(format!("bad pattern {pattern:?}: {error}"))
                })
        })
        .collect()
}

impl HubClient {
    /// Downloads a repository snapshot, returning the snapshot folder
    /// (or the local directory when one was given).
    pub async fn download_snapshot(&self, request: &SnapshotRequest) -> Result<PathBuf> {
        if request.force_download && request.local_files_only {
            return Err(HubError::InvalidArgument(
                "force_download and local_files_only are contradictory".to_string(),
            ));
        }

        let revision = request
            .revision
            .clone()
            .unwrap_or_else(|| DEFAULT_REVISION.to_string());
        let cache = RepoCache::new(&self.config().hub_cache, &request.repo);
        let local_only = request.local_files_only || self.config().offline;

        if local_only {
            return self.resolve_snapshot_offline(&cache, request, &revision, None);
        }

        let info = match self.repo_info(&request.repo, Some(&revision)).await {
            Ok(info) => info,
            Err(error) => {
                if error.is_authoritative_nack() {
                    return Err(error);
                }
                debug!(error = %error, "repo listing failed; attempting offline fallback");
                return self.resolve_snapshot_offline(&cache, request, &revision, Some(error));
            }
        };

        let commit = info
            .sha()
            .ok_or_else(|| HubError::FileMetadata {
                url: request.repo.api_url(&self.config().endpoint, Some(&revision)),
                reason: "repo info is missing the resolved commit hash".to_string(),
            })?
            .to_string();

        let mut files: Vec<String> = info
            .siblings()
            .iter()
            .map(|sibling| sibling.rfilename.clone())
            .collect();

        if files.len() >= SIBLING_TRUNCATION_THRESHOLD {
            debug!(
                siblings = files.len(),
                "sibling list may be truncated; re-listing through the tree API"
            );
            files = self
                .list_tree(&request.repo, &commit, true)
                .collect()
                .await?
                .into_iter()
                .filter_map(|entry| match entry {
                    TreeEntry::File { path, .. } => Some(path),
                    TreeEntry::Directory { .. } => None,
                })
                .collect();
        }

        let filter = SnapshotFilter::compile(&request.allow_patterns, &request.ignore_patterns)?;
        let selected: Vec<String> = files.into_iter().filter(|f| filter.matches(f)).collect();
        info!(
            repo = %request.repo.id,
            commit = %commit,
            files = selected.len(),
            "downloading snapshot"
        );

        cache.update_ref(&revision, &commit)?;
        let folder = match &request.local_dir {
            Some(local_dir) => local_dir.clone(),
            None => cache.snapshot_path(&commit),
        };
        std::fs::create_dir_all(&folder)?;

        // The turbo transport parallelizes within one file, so files go
        // one at a time; otherwise a semaphore bounds the fan-out.
        let turbo_active = self.config().enable_transfer && self.turbo_transport().is_some();
        if turbo_active {
            for filename in &selected {
                self.snapshot_file(request, &commit, filename).await?;
            }
        } else {
            let max_workers = request
                .max_workers
                .unwrap_or(self.config().max_workers)
                .max(1);
            let semaphore = Arc::new(Semaphore::new(max_workers));
            let downloads = selected.iter().map(|filename| {
                let semaphore = Arc::clone(&semaphore);
                let commit = commit.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore closed");
                    self.snapshot_file(request, &commit, filename).await
                }
            });
            for outcome in futures::future::join_all(downloads).await {
                outcome?;
            }
        }

        Ok(folder)
    }

    /// Downloads one snapshot member; a server-confirmed absence is
    /// tolerated (its no-exist marker is already on disk).
    async fn snapshot_file(
        &self,
        request: &SnapshotRequest,
        commit: &str,
        filename: &str,
    ) -> Result<()> {
        let mut file_request = DownloadRequest::new(request.repo.clone(), filename)
            .revision(commit)
            .force_download(request.force_download);
        if let Some(local_dir) = &request.local_dir {
            file_request = file_request.local_dir(local_dir.clone());
        }
        match self.download_file(&file_request).await {
            Ok(_) => Ok(()),
            Err(HubError::EntryNotFound(_)) => {
                warn!(filename, "listed file is absent server-side; skipping");
                Ok(())
            }
            Err(error) => Err(error),
        }
    }

    fn resolve_snapshot_offline(
        &self,
        cache: &RepoCache,
        request: &SnapshotRequest,
        revision: &str,
        listing_error: Option<HubError>,
    ) -> Result<PathBuf> {
        if let Some(commit) = cache.resolve_revision(revision) {
            let folder = match &request.local_dir {
                Some(local_dir) => local_dir.clone(),
                None => cache.snapshot_path(&commit),
            };
            if folder.is_dir() {
                if listing_error.is_some() {
                    warn!(
                        folder = %folder.display(),
                        "server unreachable; returning cached snapshot"
                    );
                }
                return Ok(folder);
            }
        }

        match listing_error {
            Some(error) => Err(HubError::LocalEntryNotFound(format!(
                "no cached snapshot of {} at {revision} and the repo listing failed \
                 (check your internet connection): {error}",
                request.repo.id
            ))),
            None if self.config().offline => Err(HubError::OfflineModeEnabled(format!(
                "no cached snapshot of {} at {revision}",
                request.repo.id
            ))),
            None => Err(HubError::LocalEntryNotFound(format!(
                "no cached snapshot of {} at {revision} and local_files_only is set",
                request.repo.id
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_filter_empty_allows_everything() {
        let filter = SnapshotFilter::compile(&[], &[]).unwrap();
        assert!(filter.matches("config.json"));
        assert!(filter.matches("deep/nested/file.bin"));
    }

    #[test]
    fn test_filter_allow_any_match() {
        let filter =
            SnapshotFilter::compile(&strings(&["*.txt", "*.bin"]), &[]).unwrap();
        assert!(filter.matches("a.txt"));
        assert!(filter.matches("b.bin"));
        assert!(!filter.matches("c.json"));
    }

    #[test]
    fn test_filter_ignore_wins_over_allow() {
        let filter =
            SnapshotFilter::compile(&strings(&["*.txt"]), &strings(&["secret*"])).unwrap();
        assert!(filter.matches("a.txt"));
        assert!(!filter.matches("secret.txt"));
    }

    #[test]
    fn test_filter_hidden_files() {
        let filter = SnapshotFilter::compile(&strings(&["*.txt", "*.bin"]), &strings(&[".*"]))
            .unwrap();
        assert!(filter.matches("a.txt"));
        assert!(filter.matches("b.bin"));
        assert!(!filter.matches(".hidden"));
        assert!(!filter.matches("c.json"));
    }

    #[test]
    fn test_filter_star_crosses_separators() {
        // Shell-style semantics: `*` is not stopped by `/`.
        let filter = SnapshotFilter::compile(&strings(&["*.safetensors"]), &[]).unwrap();
        assert!(filter.matches("model.safetensors"));
        assert!(filter.matches("shards/model-00001.safetensors"));
    }

    #[test]
    fn test_filter_trailing_slash_expansion() {
        let filter = SnapshotFilter::compile(&strings(&["onnx/"]), &[]).unwrap();
        assert!(filter.matches("onnx/model.onnx"));
        assert!(filter.matches("onnx/sub/part.onnx"));
        assert!(!filter.matches("model.onnx"));

        let ignoring = SnapshotFilter::compile(&[], &strings(&["logs/"])).unwrap();
        assert!(!ignoring.matches("logs/run1.txt"));
        assert!(ignoring.matches("config.json"));
    }

    #[test]
    fn test_filter_bad_pattern_errors() {
        let err = SnapshotFilter::compile(&strings(&["[unclosed"]), &[]).unwrap_err();
        assert!(matches!(err, HubError::InvalidArgument(_)));
    }

    #[test]
    fn test_request_builder() {
        let request = SnapshotRequest::new(RepoId::model("org/repo"))
            .revision("main")
            .allow_patterns(["*.txt"])
            .ignore_patterns([".*"]);
        assert_eq!(request.revision.as_deref(), Some("main"));
        assert_eq!(request.allow_patterns, vec!["*.txt"]);
        assert_eq!(request.ignore_patterns, vec![".*"]);
    }
}
