//! Repository identity, revisions, and URL templates.
//!
//! A repository is `(kind, owner/name)`. Its on-disk folder name flattens
//! the id with the `--` separator so the cache tree stays single-level.

use serde::{Deserialize, Serialize};

/// Separator used when flattening repository ids into folder names.
pub const REPO_ID_SEPARATOR: &str = "--";

/// Default symbolic revision.
pub const DEFAULT_REVISION: &str = "main";

/// The kind of a Hub repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    /// A model repository.
    Model,
    /// A dataset repository.
    Dataset,
    /// A space repository.
    Space,
}

impl RepoKind {
    /// Plural segment used in API URLs and folder names.
    pub fn plural(self) -> &'static str {
        match self {
            RepoKind::Model => "models",
            RepoKind::Dataset => "datasets",
            RepoKind::Space => "spaces",
        }
    }

    /// Prefix applied to the repo id in resolve URLs: empty for models.
    pub fn url_prefix(self) -> &'static str {
        match self {
            RepoKind::Model => "",
            RepoKind::Dataset => "datasets/",
            RepoKind::Space => "spaces/",
        }
    }
}

/// Identity of a Hub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoId {
    /// Repository kind.
    pub kind: RepoKind,
    /// `owner/name` identifier (a plain name for unowned repos).
    pub id: String,
}

impl RepoId {
    /// Creates a repository identity.
    pub fn new(kind: RepoKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    /// Creates a model repository identity.
    pub fn model(id: impl Into<String>) -> Self {
        Self::new(RepoKind::Model, id)
    }

    /// Creates a dataset repository identity.
    pub fn dataset(id: impl Into<String>) -> Self {
        Self::new(RepoKind::Dataset, id)
    }

    /// Creates a space repository identity.
    pub fn space(id: impl Into<String>) -> Self {
        Self::new(RepoKind::Space, id)
    }

    /// On-disk folder name: `<kind>s--<owner>--<name>`.
    ///
    /// Total function: every slash in the id becomes the separator, so the
    /// encoding never nests.
    pub fn folder_name(&self) -> String {
        format!(
            "{}{}{}",
            self.kind.plural(),
            REPO_ID_SEPARATOR,
            self.id.replace('/', REPO_ID_SEPARATOR)
        )
    }

    /// URL of a file at a revision:
    /// `<endpoint>/<prefix><repo_id>/resolve/<revision>/<filename>`.
    pub fn resolve_url(&self, endpoint: &str, revision: &str, filename: &str) -> String {
        format!(
            "{}/{}{}/resolve/{}/{}",
            endpoint,
            self.kind.url_prefix(),
            self.id,
            escape_revision(revision),
            escape_path(filename),
        )
    }

    /// API URL of the repository, optionally pinned to a revision:
    /// `<endpoint>/api/<kind>s/<repo_id>[/revision/<revision>]`.
    pub fn api_url(&self, endpoint: &str, revision: Option<&str>) -> String {
        let base = format!("{}/api/{}/{}", endpoint, self.kind.plural(), self.id);
        match revision {
            Some(revision) => format!("{}/revision/{}", base, escape_revision(revision)),
            None => base,
        }
    }

    /// Tree-listing API URL for a revision:
    /// `<endpoint>/api/<kind>s/<repo_id>/tree/<revision>[/<path>]`.
    pub fn tree_url(&self, endpoint: &str, revision: &str, path_in_repo: Option<&str>) -> String {
        let base = format!(
            "{}/api/{}/{}/tree/{}",
            endpoint,
            self.kind.plural(),
            self.id,
            escape_revision(revision)
        );
        match path_in_repo {
            Some(path) if !path.is_empty() => format!("{}/{}", base, escape_path(path)),
            _ => base,
        }
    }
}

/// True for a 40-hex-digit commit hash.
pub fn is_commit_hash(revision: &str) -> bool {
    revision.len() == 40 && revision.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Normalizes a raw etag: strips the weak-validator `W/` prefix and the
/// surrounding quotes.
pub fn normalize_etag(raw: &str) -> String {
    let trimmed = raw.strip_prefix("W/").unwrap_or(raw);
    trimmed.trim_matches('"').to_string()
}

/// True when an etag is SHA-256-shaped (64 hex digits), i.e. LFS content.
pub fn is_sha256_etag(etag: &str) -> bool {
    etag.len() == 64 && etag.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Percent-escapes a revision, including `/` (`%2F`).
fn escape_revision(revision: &str) -> String {
    percent_encode(revision, false)
}

/// Percent-escapes a server filename, keeping `/` separators intact.
fn escape_path(path: &str) -> String {
    percent_encode(path, true)
}

fn percent_encode(input: &str, keep_slash: bool) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        let passthrough = byte.is_ascii_alphanumeric()
            || matches!(byte, b'-' | b'.' | b'_' | b'~')
            || (keep_slash && byte == b'/');
        if passthrough {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_name_flattens_slashes() {
        assert_eq!(
            RepoId::model("meta-llama/Llama-3.2-1B").folder_name(),
            "models--meta-llama--Llama-3.2-1B"
        );
        assert_eq!(
            RepoId::dataset("squad").folder_name(),
            "datasets--squad"
        );
        assert_eq!(
            RepoId::space("user/app").folder_name(),
            "spaces--user--app"
        );
    }

    #[test]
    fn test_folder_name_is_injective_over_kinds() {
        let a = RepoId::model("x/y").folder_name();
        let b = RepoId::dataset("x/y").folder_name();
        let c = RepoId::space("x/y").folder_name();
        assert_ne!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_resolve_url_per_kind_prefix() {
        let endpoint = "https://huggingface.co";
        assert_eq!(
            RepoId::model("org/repo").resolve_url(endpoint, "main", "config.json"),
            "https://huggingface.co/org/repo/resolve/main/config.json"
        );
        assert_eq!(
            RepoId::dataset("org/repo").resolve_url(endpoint, "main", "data.csv"),
            "https://huggingface.co/datasets/org/repo/resolve/main/data.csv"
        );
        assert_eq!(
            RepoId::space("org/app").resolve_url(endpoint, "main", "app.py"),
            "https://huggingface.co/spaces/org/app/resolve/main/app.py"
        );
    }

    #[test]
    fn test_resolve_url_escapes_revision_slash() {
        let url =
            RepoId::model("org/repo").resolve_url("https://hub", "refs/pr/1", "weights.bin");
        assert_eq!(url, "https://hub/org/repo/resolve/refs%2Fpr%2F1/weights.bin");
    }

    #[test]
    fn test_resolve_url_keeps_filename_separators() {
        let url = RepoId::model("org/repo").resolve_url("https://hub", "main", "sub dir/a.bin");
        assert_eq!(url, "https://hub/org/repo/resolve/main/sub%20dir/a.bin");
    }

    #[test]
    fn test_api_url_with_and_without_revision() {
        let repo = RepoId::model("org/repo");
        assert_eq!(
            repo.api_url("https://hub", None),
            "https://hub/api/models/org/repo"
        );
        assert_eq!(
            repo.api_url("https://hub", Some("refs/pr/2")),
            "https://hub/api/models/org/repo/revision/refs%2Fpr%2F2"
        );
    }

    #[test]
    fn test_is_commit_hash() {
        assert!(is_commit_hash("deadbeefdeadbeefdeadbeefdeadbeefdeadbeef"));
        assert!(is_commit_hash("DEADBEEFDEADBEEFDEADBEEFDEADBEEFDEADBEEF"));
        assert!(!is_commit_hash("main"));
        assert!(!is_commit_hash("deadbeef"));
        assert!(!is_commit_hash("zzzzbeefdeadbeefdeadbeefdeadbeefdeadbeef"));
    }

    #[test]
    fn test_normalize_etag() {
        assert_eq!(normalize_etag("\"abc123\""), "abc123");
        assert_eq!(normalize_etag("W/\"abc123\""), "abc123");
        assert_eq!(normalize_etag("abc123"), "abc123");
    }

    #[test]
    fn test_is_sha256_etag() {
        assert!(is_sha256_etag(&"a".repeat(64)));
        assert!(!is_sha256_etag(&"a".repeat(40)));
        assert!(!is_sha256_etag(&"g".repeat(64)));
    }
}
