//! Hub metadata API: repository info and recursive tree listing.
//!
//! Repository info comes in three kind-specific shapes with a shared
//! `{sha, siblings}` projection, which is all the snapshot coordinator
//! needs. Tree listing is a lazy, restartable paginator driven by the
//! `Link: …; rel="next"` header. Both retry on 429 in addition to the
//! default retry statuses.

use serde::Deserialize;
use tracing::debug;

use hubcache_core::{HubError, HubHttpError, RepoId, RepoKind, Result};
use hubcache_transport::{
    classify_response, execute, link_header_target, BackoffPolicy, RetryBody,
};

use crate::client::HubClient;

/// LFS descriptor attached to a sibling or tree entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LfsInfo {
    /// SHA-256 of the content.
    pub oid: String,
    /// Content size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
}

/// One file entry belonging to a repository at a revision.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Sibling {
    /// Path of the file inside the repository.
    pub rfilename: String,
    /// Size in bytes, when the server expanded it.
    #[serde(default)]
    pub size: Option<u64>,
    /// LFS descriptor for LFS-tracked files.
    #[serde(default)]
    pub lfs: Option<LfsInfo>,
}

/// Model repository info.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelInfo {
    /// Repository id.
    pub id: String,
    /// Resolved commit hash.
    #[serde(default)]
    pub sha: Option<String>,
    /// Files at the resolved revision.
    #[serde(default)]
    pub siblings: Option<Vec<Sibling>>,
    /// Private-repo flag.
    #[serde(default)]
    pub private: bool,
    /// Primary pipeline tag, when classified.
    #[serde(default)]
    pub pipeline_tag: Option<String>,
    /// Library the model integrates with.
    #[serde(default)]
    pub library_name: Option<String>,
}

/// Dataset repository info.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetInfo {
    /// Repository id.
    pub id: String,
    /// Resolved commit hash.
    #[serde(default)]
    pub sha: Option<String>,
    /// Files at the resolved revision.
    #[serde(default)]
    pub siblings: Option<Vec<Sibling>>,
    /// Private-repo flag.
    #[serde(default)]
    pub private: bool,
}

/// Space repository info.
#[derive(Debug, Clone, Deserialize)]
pub struct SpaceInfo {
    /// Repository id.
    pub id: String,
    /// Resolved commit hash.
    #[serde(default)]
    pub sha: Option<String>,
    /// Files at the resolved revision.
    #[serde(default)]
    pub siblings: Option<Vec<Sibling>>,
    /// Private-repo flag.
    #[serde(default)]
    pub private: bool,
    /// SDK the space runs on.
    #[serde(default)]
    pub sdk: Option<String>,
}

/// Repository info, one variant per kind, sharing a `{sha, siblings}`
/// projection.
#[derive(Debug, Clone)]
pub enum RepoInfo {
    /// Model repository.
    Model(ModelInfo),
    /// Dataset repository.
    Dataset(DatasetInfo),
    /// Space repository.
    Space(SpaceInfo),
}

impl RepoInfo {
    /// The resolved commit hash, when the server reported one.
    pub fn sha(&self) -> Option<&str> {
        match self {
            RepoInfo::Model(info) => info.sha.as_deref(),
            RepoInfo::Dataset(info) => info.sha.as_deref(),
            RepoInfo::Space(info) => info.sha.as_deref(),
        }
    }

    /// The sibling list, empty when the server omitted it.
    pub fn siblings(&self) -> &[Sibling] {
        let siblings = match self {
            RepoInfo::Model(info) => &info.siblings,
            RepoInfo::Dataset(info) => &info.siblings,
            RepoInfo::Space(info) => &info.siblings,
        };
        siblings.as_deref().unwrap_or(&[])
    }
}

/// One entry streamed by the tree-listing API.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeEntry {
    /// A file, with its size and object id.
    File {
        /// Path inside the repository.
        path: String,
        /// Size in bytes.
        #[serde(default)]
        size: Option<u64>,
        /// Git object id.
        #[serde(default)]
        oid: Option<String>,
        /// LFS descriptor for LFS-tracked files.
        #[serde(default)]
        lfs: Option<LfsInfo>,
    },
    /// A directory.
    Directory {
        /// Path inside the repository.
        path: String,
    },
}

impl TreeEntry {
    /// Path of the entry, whatever its type.
    pub fn path(&self) -> &str {
        match self {
            TreeEntry::File { path, .. } | TreeEntry::Directory { path } => path,
        }
    }
}

/// Lazy paginator over the tree-listing API.
///
/// Pages are fetched on demand; `restart()` rewinds to the first page.
pub struct TreePager<'a> {
    client: &'a HubClient,
    first_url: String,
    next_url: Option<String>,
}

impl<'a> TreePager<'a> {
    fn new(client: &'a HubClient, url: String) -> Self {
        Self {
            client,
            next_url: Some(url.clone()),
            first_url: url,
        }
    }

    /// Rewinds the paginator to the first page.
    pub fn restart(&mut self) {
        self.next_url = Some(self.first_url.clone());
    }

    /// Fetches the next page, or `None` after the last one.
    pub async fn next_page(&mut self) -> Result<Option<Vec<TreeEntry>>> {
        let Some(url) = self.next_url.take() else {
            return Ok(None);
        };

        let policy = BackoffPolicy::with_rate_limit_retry();
        let headers = self.client.request_headers(true);
        let timeout = self.client.config().etag_timeout;
        let request_url = url.clone();
        let response = execute(&policy, self.client.session(), RetryBody::Empty, move |session| {
            session
                .client()
                .get(request_url.clone())
                .headers(headers.clone())
                .timeout(timeout)
        })
        .await?;

        let status = response.status();
        let response_headers = response.headers().clone();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(
                &url,
                status.as_u16(),
                &response_headers,
                None,
                &body,
            ));
        }

        self.next_url = match link_header_target(&response_headers, "next") {
            Some(next) if next.starts_with('"') => {
                // A JSON-quoted URL is a malformed pagination link, not a
                // format this client guesses around.
                return Err(HubError::Http(HubHttpError::new(
                    url,
                    format!("JSON-quoted pagination URL in Link header: {next}"),
                )));
            }
            other => other,
        };

        let entries: Vec<TreeEntry> = response.json().await?;
        debug!(count = entries.len(), more = self.next_url.is_some(), "fetched tree page");
        Ok(Some(entries))
    }

    /// Drains the remaining pages into one vector.
    pub async fn collect(mut self) -> Result<Vec<TreeEntry>> {
        let mut entries = Vec::new();
        while let Some(page) = self.next_page().await? {
            entries.extend(page);
        }
        Ok(entries)
    }
}

impl HubClient {
    /// Fetches repository info at a revision: `{sha, siblings}` plus
    /// kind-specific fields.
    pub async fn repo_info(&self, repo: &RepoId, revision: Option<&str>) -> Result<RepoInfo> {
        if self.config().offline {
            return Err(HubError::OfflineModeEnabled(format!(
                "cannot fetch repo info for {}",
                repo.id
            )));
        }

        let url = repo.api_url(&self.config().endpoint, revision);
        let policy = BackoffPolicy::with_rate_limit_retry();
        let headers = self.request_headers(true);
        let timeout = self.config().etag_timeout;
        let request_url = url.clone();
        let response = execute(&policy, self.session(), RetryBody::Empty, move |session| {
            session
                .client()
                .get(request_url.clone())
                .headers(headers.clone())
                .timeout(timeout)
        })
        .await?;

        let status = response.status();
        if !status.is_success() {
            let response_headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_response(
                &url,
                status.as_u16(),
                &response_headers,
                None,
                &body,
            ));
        }

        Ok(match repo.kind {
            RepoKind::Model => RepoInfo::Model(response.json().await?),
            RepoKind::Dataset => RepoInfo::Dataset(response.json().await?),
            RepoKind::Space => RepoInfo::Space(response.json().await?),
        })
    }

    /// Lists the repository tree at a revision, one page at a time.
    pub fn list_tree<'a>(
        &'a self,
        repo: &RepoId,
        revision: &str,
        recursive: bool,
    ) -> TreePager<'a> {
        let mut url = repo.tree_url(&self.config().endpoint, revision, None);
        if recursive {
            url.push_str("?recursive=true");
        }
        TreePager::new(self, url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_info_projection() {
        let model: ModelInfo = serde_json::from_str(
            r#"{
                "id": "org/repo",
                "sha": "deadbeefdeadbeefdeadbeefdeadbeefdeadbeef",
                "private": false,
                "pipeline_tag": "text-generation",
                "siblings": [
                    {"rfilename": "config.json"},
                    {"rfilename": "model.safetensors", "size": 123,
                     "lfs": {"oid": "aaaa", "size": 123}}
                ]
            }"#,
        )
        .unwrap();
        let info = RepoInfo::Model(model);
        assert_eq!(
            info.sha(),
            Some("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef")
        );
        assert_eq!(info.siblings().len(), 2);
        assert_eq!(info.siblings()[0].rfilename, "config.json");
        assert_eq!(
            info.siblings()[1].lfs.as_ref().unwrap().oid,
            "aaaa"
        );
    }

    #[test]
    fn test_repo_info_tolerates_missing_fields() {
        let dataset: DatasetInfo = serde_json::from_str(r#"{"id": "squad"}"#).unwrap();
        let info = RepoInfo::Dataset(dataset);
        assert_eq!(info.sha(), None);
        assert!(info.siblings().is_empty());

        let space: SpaceInfo =
            serde_json::from_str(r#"{"id": "org/app", "sdk": "gradio", "siblings": null}"#)
                .unwrap();
        assert!(RepoInfo::Space(space).siblings().is_empty());
    }

    #[test]
    fn test_tree_entry_tagged_decoding() {
        let entries: Vec<TreeEntry> = serde_json::from_str(
            r#"[
                {"type": "file", "path": "a.txt", "size": 5, "oid": "abc"},
                {"type": "directory", "path": "sub"},
                {"type": "file", "path": "big.bin",
                 "lfs": {"oid": "ffff", "size": 999}}
            ]"#,
        )
        .unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path(), "a.txt");
        assert!(matches!(entries[1], TreeEntry::Directory { .. }));
        match &entries[2] {
            TreeEntry::File { lfs, .. } => assert_eq!(lfs.as_ref().unwrap().size, Some(999)),
            other => panic!("unexpected entry: {other:?}"),
        }
    }
}
